//! Errors raised by decorated data fetchers and by configuration loading.
use displaydoc::Display;
use thiserror::Error;
use tower::BoxError;

use crate::graphql;
use crate::registry::FieldCoordinates;

/// Errors returned by a decorated data fetcher on top of the ones raised by the wrapped fetcher.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum FetchError {
    /// subscription field '{field}' returned a value that cannot be adapted to a stream
    SubscriptionNotStreamable {
        /// The subscription root field.
        field: FieldCoordinates,
    },
}

/// Configuration errors.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not read configuration: {0}
    Yaml(#[from] serde_yaml::Error),

    /// capture key '{key}' is listed more than once
    DuplicateCaptureKey {
        /// The repeated key.
        key: String,
    },
}

/// Terminal error of a subscription stream once its failure has been resolved into GraphQL
/// errors.
///
/// A stream error that already is a `SubscriptionPublisherError` is passed through as is, so
/// nested decorators or fetchers that resolve their own errors are not resolved twice.
#[derive(Error, Debug)]
#[error("subscription publisher failed: {source}")]
pub struct SubscriptionPublisherError {
    errors: Vec<graphql::Error>,
    #[source]
    source: BoxError,
}

impl SubscriptionPublisherError {
    pub fn new(errors: Vec<graphql::Error>, source: BoxError) -> Self {
        Self { errors, source }
    }

    /// The GraphQL errors to send as the last event of the subscription.
    pub fn errors(&self) -> &[graphql::Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<graphql::Error> {
        self.errors
    }

    /// The error raised by the stream.
    pub fn cause(&self) -> &BoxError {
        &self.source
    }
}
