pub mod ops;
pub mod rsvp;
pub mod workflows;
