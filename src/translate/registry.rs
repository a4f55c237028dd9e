//! Provider registry: every registered adapter converts to and from every
//! other through the IR, so conversion pairs are derived, never declared.
//!
//! The registry is assembled once with [`ProviderRegistry::builder`] and is
//! immutable afterwards. [`ProviderRegistry::global`] holds the process-wide
//! instance with the built-in providers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use tracing::warn;

use super::adapter::{ProviderAdapter, WireAdapter};
use super::anthropic::AnthropicAdapter;
use super::openai::OpenAiAdapter;
use super::pipeline::ConversionPipeline;
use crate::error::{BridgeError, Result};
use crate::providers::ProviderKind;

#[derive(Default)]
pub struct RegistryBuilder {
    adapters: BTreeMap<ProviderKind, Arc<dyn WireAdapter>>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn register<A: ProviderAdapter>(mut self, adapter: A) -> Self {
        let kind = ProviderAdapter::kind(&adapter);
        if self.adapters.insert(kind, Arc::new(adapter)).is_some() {
            warn!(provider = %kind, "Adapter registered twice; keeping the last one");
        }
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            adapters: self.adapters,
        }
    }
}

pub struct ProviderRegistry {
    adapters: BTreeMap<ProviderKind, Arc<dyn WireAdapter>>,
}

impl ProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// A registry holding every provider this crate ships.
    pub fn builtin() -> Self {
        Self::builder()
            .register(OpenAiAdapter)
            .register(AnthropicAdapter)
            .build()
    }

    /// The process-wide registry, built on first use.
    pub fn global() -> &'static ProviderRegistry {
        static REGISTRY: OnceLock<ProviderRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::builtin)
    }

    pub fn providers(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.adapters.keys().copied()
    }

    pub fn is_registered(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    pub fn adapter(&self, kind: ProviderKind) -> Result<Arc<dyn WireAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownProvider(kind.to_string()))
    }

    pub fn can_convert(&self, source: ProviderKind, target: ProviderKind) -> bool {
        self.is_registered(source) && self.is_registered(target)
    }

    pub fn possible_targets(&self, source: ProviderKind) -> BTreeSet<ProviderKind> {
        if self.is_registered(source) {
            self.providers().collect()
        } else {
            BTreeSet::new()
        }
    }

    pub fn possible_sources(&self, target: ProviderKind) -> BTreeSet<ProviderKind> {
        if self.is_registered(target) {
            self.providers().collect()
        } else {
            BTreeSet::new()
        }
    }

    /// Every `(source, target)` pair, identity pairs included.
    pub fn all_conversion_pairs(&self) -> BTreeSet<(ProviderKind, ProviderKind)> {
        self.providers()
            .flat_map(|source| self.providers().map(move |target| (source, target)))
            .collect()
    }

    pub fn pipeline(&self, source: ProviderKind, target: ProviderKind) -> Result<ConversionPipeline> {
        Ok(ConversionPipeline::new(
            self.adapter(source)?,
            self.adapter(target)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REQUESTS: [(ProviderKind, &str); 2] = [
        (
            ProviderKind::OpenAi,
            r#"{"model":"m","messages":[{"role":"system","content":"s"},{"role":"user","content":"Hi"}],"max_tokens":10}"#,
        ),
        (
            ProviderKind::Anthropic,
            r#"{"model":"m","max_tokens":10,"system":"s","messages":[{"role":"user","content":"Hi"}]}"#,
        ),
    ];

    #[test]
    fn test_single_provider_converts_with_itself() {
        let registry = ProviderRegistry::builder().register(OpenAiAdapter).build();
        assert!(registry.can_convert(ProviderKind::OpenAi, ProviderKind::OpenAi));
        assert!(!registry.can_convert(ProviderKind::OpenAi, ProviderKind::Anthropic));
        assert_eq!(
            registry.all_conversion_pairs(),
            BTreeSet::from([(ProviderKind::OpenAi, ProviderKind::OpenAi)])
        );
        assert!(registry
            .possible_targets(ProviderKind::Anthropic)
            .is_empty());
    }

    #[test]
    fn test_registering_adds_both_directions() {
        let before = ProviderRegistry::builder().register(OpenAiAdapter).build();
        let after = ProviderRegistry::builder()
            .register(OpenAiAdapter)
            .register(AnthropicAdapter)
            .build();

        let added: BTreeSet<_> = after
            .all_conversion_pairs()
            .difference(&before.all_conversion_pairs())
            .copied()
            .collect();
        assert_eq!(
            added,
            BTreeSet::from([
                (ProviderKind::OpenAi, ProviderKind::Anthropic),
                (ProviderKind::Anthropic, ProviderKind::OpenAi),
                (ProviderKind::Anthropic, ProviderKind::Anthropic),
            ])
        );
    }

    #[test]
    fn test_every_pair_is_complete() {
        let registry = ProviderRegistry::builtin();
        let n = registry.providers().count();
        assert_eq!(registry.all_conversion_pairs().len(), n * n);

        for source in registry.providers() {
            assert_eq!(
                registry.possible_targets(source),
                registry.providers().collect::<BTreeSet<_>>()
            );
            assert_eq!(
                registry.possible_sources(source),
                registry.providers().collect::<BTreeSet<_>>()
            );
        }

        for (source, target) in registry.all_conversion_pairs() {
            let pipeline = registry.pipeline(source, target).unwrap();
            assert_eq!(pipeline.source(), source);
            assert_eq!(pipeline.target(), target);

            let (_, body) = SAMPLE_REQUESTS
                .iter()
                .find(|(kind, _)| *kind == source)
                .unwrap();
            let ir = pipeline.normalize_request(body.as_bytes()).unwrap();
            let wire = pipeline.transform_request(&ir).unwrap();
            assert_eq!(wire["model"], "m", "{source} -> {target}");

            let back = registry
                .pipeline(target, source)
                .unwrap()
                .normalize_request(wire.to_string().as_bytes())
                .unwrap();
            assert_eq!(back.messages, ir.messages, "{source} -> {target}");
        }
    }

    #[test]
    fn test_unknown_provider_has_no_pipeline() {
        let registry = ProviderRegistry::builder().register(AnthropicAdapter).build();
        let err = registry
            .pipeline(ProviderKind::OpenAi, ProviderKind::Anthropic)
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::UnknownProvider(name) if name == "openai"));
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = ProviderRegistry::global();
        let b = ProviderRegistry::global();
        assert!(std::ptr::eq(a, b));
        assert!(a.can_convert(ProviderKind::Anthropic, ProviderKind::OpenAi));
    }
}
