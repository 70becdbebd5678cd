// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP wire plumbing and JSON DTOs shared by the scheduler and agent.
//!
//! Both daemons speak plain HTTP/1.1 with JSON bodies and Content-Length
//! framing; `/events` responses are line-delimited JSON on a connection
//! that stays open.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod http;
mod types;

pub use http::{
    open_stream, read_request, request, status_text, write_response, write_stream_head,
    write_stream_line, HttpError, HttpRequest, HttpResponse, HttpStream,
};
pub use types::{
    AgentEvent, AgentIntrospection, ErrorResponse, SchedulerStatus, SuccessResponse,
};
