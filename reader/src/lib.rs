pub mod batch;
pub mod bus;
pub mod controller;
pub mod convert;
pub mod detector;
pub mod naming;
pub mod pending;
pub mod recorder;
pub mod source;
