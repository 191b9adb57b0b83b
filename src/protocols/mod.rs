pub mod http;
pub mod rest;
pub mod sse;
pub mod ws;
