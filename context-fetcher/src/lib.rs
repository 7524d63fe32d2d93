//! Decorates GraphQL data fetchers so that they can return futures and streams, see the
//! request context (including thread-local state) across await points, stop when the client
//! cancels the request, and turn subscription failures into GraphQL errors.

#![warn(unreachable_pub)]

pub mod adapter;
pub mod cancellation;
pub mod configuration;
mod context;
pub mod decorator;
pub mod error;
pub mod fetcher;
pub mod graphql;
pub mod installer;
pub mod json_ext;
pub mod registry;
pub mod snapshot;
pub mod subscription;

pub use adapter::AdapterRegistry;
pub use cancellation::CancellationSignal;
pub use configuration::Configuration;
pub use context::Context;
pub use context::LocalContext;
pub use decorator::ContextDataFetcherDecorator;
pub use fetcher::DataFetcher;
pub use fetcher::FetchEnvironment;
pub use fetcher::FetcherResult;
pub use fetcher::FieldValue;
pub use installer::Installer;
pub use installer::decorate_registry;
pub use registry::CodeRegistry;
pub use registry::FieldCoordinates;
pub use snapshot::ContextSnapshot;
pub use snapshot::ContextSnapshotFactory;
pub use subscription::SubscriptionExceptionResolver;
