//! UHS API (Universal Http Server API)
//! is the protocol vocabulary shared between the carbon application server and the
//! applications it hosts: ASCII string helpers and HTTP status codes with their reason phrases.

pub mod ascii;
pub mod http;
