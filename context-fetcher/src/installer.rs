//! Installs [`ContextDataFetcherDecorator`] on the data fetchers of a schema.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::ast::OperationType;
use apollo_compiler::schema::ExtendedType;

use crate::adapter::AdapterRegistry;
use crate::decorator::ContextDataFetcherDecorator;
use crate::fetcher::EngineFetcher;
use crate::fetcher::FetcherKind;
use crate::registry::CodeRegistry;
use crate::registry::FieldCoordinates;
use crate::subscription::CompositeSubscriptionExceptionResolver;
use crate::subscription::SubscriptionExceptionResolver;

/// Decorates the data fetchers of a [`CodeRegistry`] for a schema.
#[derive(Clone, Debug)]
pub struct Installer {
    exception_resolver: Arc<CompositeSubscriptionExceptionResolver>,
    adapters: Arc<AdapterRegistry>,
}

impl Installer {
    /// An installer resolving subscription errors with `resolvers`, tried in order, and
    /// recognizing the asynchronous types of the default [`AdapterRegistry`].
    pub fn new(resolvers: Vec<Arc<dyn SubscriptionExceptionResolver>>) -> Self {
        Installer {
            exception_resolver: Arc::new(CompositeSubscriptionExceptionResolver::new(resolvers)),
            adapters: Arc::new(AdapterRegistry::default()),
        }
    }

    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = Arc::new(adapters);
        self
    }

    /// Returns `registry` with every eligible data fetcher of `schema`'s object and interface
    /// fields decorated.
    ///
    /// Data fetchers registered for fields that are not in `schema` are kept as they are.
    pub fn install(&self, schema: &Schema, registry: CodeRegistry) -> CodeRegistry {
        let fields = schema_fields(schema);
        let mut decorated = 0;
        let mut installed = CodeRegistry::new();
        for (coordinates, fetcher) in registry.iter() {
            let Some(&subscription) = fields.get(coordinates) else {
                installed.insert(coordinates.clone(), fetcher.clone());
                continue;
            };
            if !is_eligible(fetcher.kind()) {
                tracing::debug!(field = %coordinates, kind = ?fetcher.kind(), "not decorating data fetcher");
                installed.insert(coordinates.clone(), fetcher.clone());
                continue;
            }
            tracing::debug!(field = %coordinates, subscription, "decorating data fetcher");
            installed.insert(
                coordinates.clone(),
                Arc::new(ContextDataFetcherDecorator::new(
                    fetcher.clone(),
                    subscription,
                    self.exception_resolver.clone(),
                    self.adapters.clone(),
                )),
            );
            decorated += 1;
        }
        tracing::debug!(
            decorated,
            total = installed.len(),
            "installed data fetcher decorators"
        );
        installed
    }
}

impl Default for Installer {
    fn default() -> Self {
        Installer::new(Vec::new())
    }
}

/// Decorates the data fetchers of `registry` with the default [`AdapterRegistry`].
pub fn decorate_registry(
    schema: &Schema,
    registry: CodeRegistry,
    resolvers: Vec<Arc<dyn SubscriptionExceptionResolver>>,
) -> CodeRegistry {
    Installer::new(resolvers).install(schema, registry)
}

/// Whether a data fetcher of this kind gets decorated.
pub fn is_eligible(kind: FetcherKind) -> bool {
    match kind {
        FetcherKind::Application => true,
        FetcherKind::Trivial => false,
        FetcherKind::Engine(EngineFetcher::Factory | EngineFetcher::Validation) => true,
        FetcherKind::Engine(_) => false,
    }
}

// Object and interface fields, with whether they are subscription root fields.
fn schema_fields(schema: &Schema) -> HashMap<FieldCoordinates, bool> {
    let subscription_type = schema.root_operation(OperationType::Subscription);
    let mut fields = HashMap::new();
    for (type_name, ty) in &schema.types {
        let field_names: Vec<_> = match ty {
            ExtendedType::Object(ty) => ty.fields.keys().collect(),
            ExtendedType::Interface(ty) => ty.fields.keys().collect(),
            _ => continue,
        };
        let subscription = subscription_type == Some(type_name);
        for field_name in field_names {
            fields.insert(
                FieldCoordinates::new(type_name.as_str(), field_name.as_str()),
                subscription,
            );
        }
    }
    fields
}
