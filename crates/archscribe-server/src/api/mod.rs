// ABOUTME: API module containing the HTTP handler functions for the archscribe REST API.
// ABOUTME: Organized into task submission with SSE streaming and stored task history.

pub mod analyze;
pub mod tasks;
