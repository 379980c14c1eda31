pub mod domain_session;

pub use domain_session::{DeviceViolation, DomainSession, EditConflict, EditOutcome, EditedValue};
