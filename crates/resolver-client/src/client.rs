//! Direct resolution: decompose, build, evaluate, select
//!
//! Unlike the handshake, the direct path needs no resolving contract. The client builds the
//! resolution request itself and interprets the outputs with [`select`].

use alloy_primitives::Address;
use futures::future::join_all;
use resolver_core::{
    select, BasenameRegistry, Decomposition, Delegation, RecordKind, ResolutionBuilder,
    ResolvedRecord, StorageLayout,
};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::prover::{evaluate_with_retry, Prover};

/// Resolves names against a registry contract through a prover
pub struct Resolver<P> {
    basenames: BasenameRegistry,
    builder: ResolutionBuilder,
    prover: P,
    retries: u32,
}

impl<P: Prover> Resolver<P> {
    pub fn new(basenames: BasenameRegistry, builder: ResolutionBuilder, prover: P) -> Self {
        Self {
            basenames,
            builder,
            prover,
            retries: 0,
        }
    }

    pub fn prover(&self) -> &P {
        &self.prover
    }

    pub fn basenames(&self) -> &BasenameRegistry {
        &self.basenames
    }

    /// Match `name` against the basename registry; no remote calls
    pub fn decompose(&self, name: &str) -> Result<Decomposition> {
        Ok(self.basenames.decompose(name)?)
    }

    pub async fn resolve(&self, name: &str, record: &RecordKind) -> Result<ResolvedRecord> {
        self.resolve_with(name, record, self.builder.delegation()).await
    }

    /// Resolve with an explicit delegation mode, e.g. a lease check at a given time
    pub async fn resolve_with(
        &self,
        name: &str,
        record: &RecordKind,
        delegation: Delegation,
    ) -> Result<ResolvedRecord> {
        let decomposition = self.decompose(name)?;
        let request = self
            .builder
            .clone()
            .with_delegation(delegation)
            .build(&decomposition, record)?;

        let state =
            evaluate_with_retry(&self.prover, &request.ops, &request.inputs, self.retries).await?;
        let resolved = select(&decomposition, &state)?;

        tracing::info!(
            name,
            record = %record,
            delegation = ?resolved.delegation,
            len = resolved.value.len(),
            "Resolved"
        );

        Ok(resolved)
    }

    /// Resolve the same record for several names concurrently, results in input order
    pub async fn resolve_many(
        &self,
        names: &[&str],
        record: &RecordKind,
    ) -> Vec<Result<ResolvedRecord>> {
        join_all(names.iter().map(|name| self.resolve(name, record))).await
    }
}

/// Builder for [`Resolver`]
pub struct ResolverBuilder {
    registry: Address,
    layout: StorageLayout,
    delegation: Delegation,
    basenames: BasenameRegistry,
    retries: u32,
}

impl ResolverBuilder {
    pub fn new(registry: Address) -> Self {
        Self {
            registry,
            layout: StorageLayout::default(),
            delegation: Delegation::default(),
            basenames: BasenameRegistry::new(),
            retries: 0,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.registry)
            .layout(config.layout)
            .basenames(config.basename_registry())
            .retries(config.prover_retries)
    }

    pub fn basename(mut self, name: impl Into<String>, controller: Address) -> Self {
        self.basenames.insert(name, controller);
        self
    }

    pub fn basenames(mut self, basenames: BasenameRegistry) -> Self {
        self.basenames = basenames;
        self
    }

    pub fn layout(mut self, layout: StorageLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn delegation(mut self, delegation: Delegation) -> Self {
        self.delegation = delegation;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn build<P: Prover>(self, prover: P) -> Resolver<P> {
        let builder = ResolutionBuilder::new(self.registry)
            .with_layout(self.layout)
            .with_delegation(self.delegation);

        let mut resolver = Resolver::new(self.basenames, builder, prover);
        resolver.retries = self.retries;
        resolver
    }
}
