//! Request and security metrics
//!
//! # Metrics
//!
//! - `toolwire_requests_total`: Counter of dispatched requests by method
//! - `toolwire_request_duration_seconds`: Histogram of dispatch duration by method
//! - `toolwire_request_errors_total`: Counter of error responses by method and code
//! - `toolwire_requests_in_flight`: Gauge of requests currently being handled
//! - `toolwire_security_denials_total`: Counter of denials by policy and reason
//!
//! No exporter is installed; the binary or embedding application picks one.

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::cell::Cell;
use std::time::Instant;

use crate::security::{Denial, DenialReason};

/// Metrics for one dispatched request.
///
/// Creating it counts the request and raises the in-flight gauge; dropping
/// it lowers the gauge again.
#[derive(Debug)]
pub struct RequestMetrics {
    method: String,
    start: Instant,
    recorded: Cell<bool>,
}

impl RequestMetrics {
    /// Start tracking a request for `method`.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolwire::metrics::RequestMetrics;
    ///
    /// let m = RequestMetrics::new("tools/call");
    /// m.record_success();
    /// ```
    pub fn new(method: &str) -> Self {
        increment_counter!("toolwire_requests_total", "method" => method.to_string());
        increment_gauge!("toolwire_requests_in_flight", 1.0);
        Self {
            method: method.to_string(),
            start: Instant::now(),
            recorded: Cell::new(false),
        }
    }

    /// Record a successful response.
    pub fn record_success(&self) {
        if self.recorded.replace(true) {
            return;
        }
        histogram!(
            "toolwire_request_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "method" => self.method.clone()
        );
    }

    /// Record an error response with JSON-RPC `code`.
    pub fn record_error(&self, code: i64) {
        if self.recorded.replace(true) {
            return;
        }
        histogram!(
            "toolwire_request_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "method" => self.method.clone()
        );
        increment_counter!(
            "toolwire_request_errors_total",
            "method" => self.method.clone(),
            "code" => code.to_string()
        );
    }
}

impl Drop for RequestMetrics {
    fn drop(&mut self) {
        decrement_gauge!("toolwire_requests_in_flight", 1.0);
    }
}

/// Count one policy denial.
pub fn record_denial(denial: &Denial) {
    let reason = match denial.reason {
        DenialReason::Unauthenticated => "unauthenticated",
        DenialReason::RateLimited { .. } => "rate_limited",
    };
    increment_counter!(
        "toolwire_security_denials_total",
        "policy" => denial.policy.clone(),
        "reason" => reason
    );
}
