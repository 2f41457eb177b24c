//! Workshops, their attendees, and the derived workshop status.

mod aggregate;
mod sqlite_store;
mod store;
mod types;

pub use aggregate::derive_workshop_status;
pub use sqlite_store::SqliteWorkshopStore;
pub use store::{StoreError, WorkshopFilter, WorkshopStore};
pub use types::{
    Attendee, AttendeeSpec, CreateAttendeeRequest, CreateWorkshopRequest, Status, Workshop,
};
