//! Ways into and out of the service: the HTTP API and CSV reports.

pub mod csv;
pub mod http;
