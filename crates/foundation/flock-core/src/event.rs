//! Result and notification wrappers for the presentation layer

use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// State of an operation as seen by a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resource<T> {
    Loading,
    Success(T),
    Failure { kind: ErrorKind, message: String },
}

impl<T> Resource<T> {
    /// Fold an operation result; errors never escape as faults
    pub fn from_result(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Resource::Success(value),
            Err(e) => Resource::from_error(&e),
        }
    }

    pub fn from_error(error: &Error) -> Self {
        Resource::Failure {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Resource::Loading)
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Resource::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the UI should offer a retry affordance
    pub fn is_retryable(&self) -> bool {
        match self {
            Resource::Failure { kind, .. } => kind.is_retryable(),
            _ => false,
        }
    }
}

/// A value delivered at most once.
///
/// Guards a notification against re-firing when a subscriber reattaches
/// and re-reads the latest state.
#[derive(Debug)]
pub struct Event<T> {
    content: T,
    handled: AtomicBool,
}

impl<T> Event<T> {
    pub fn new(content: T) -> Self {
        Self {
            content,
            handled: AtomicBool::new(false),
        }
    }

    /// Content on first call, `None` afterwards
    pub fn take(&self) -> Option<&T> {
        if self.handled.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(&self.content)
        }
    }

    /// Content regardless of delivery state
    pub fn peek(&self) -> &T {
        &self.content
    }

    pub fn has_been_handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }
}

impl<T> Event<Resource<T>> {
    /// Wrap an operation result as a one-shot notification
    pub fn from_result(result: crate::Result<T>) -> Self {
        Event::new(Resource::from_result(result))
    }
}

impl<T> From<T> for Event<T> {
    fn from(content: T) -> Self {
        Event::new(content)
    }
}
