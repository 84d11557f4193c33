//! End-to-end integration tests.
//!
//! An identity provider and two service providers run in-process and hand
//! each other the messages a browser or SOAP client would carry.

mod common;
mod persistence;
mod single_logout;
mod single_sign_on;
