//! Named model registry with lazy, at-most-once instantiation.
//!
//! The registry is built from the `[[models]]` definitions. Names are
//! validated up front; capabilities are only created the first time a
//! consumer asks for them. Each (name, role) pair is guarded by its own
//! [`OnceCell`], so concurrent first requests for the same model wait on a
//! single creation and then share the instance, while requests for
//! different models never block each other.
//!
//! A creation failure leaves the cell empty; the next request tries again.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::{ModelConfig, Role};
use crate::error::{Error, Result};
use crate::providers::{BuiltinFactory, CompletionModel, EmbeddingModel, ModelFactory};

struct Entry {
    config: ModelConfig,
    completion: OnceCell<Arc<dyn CompletionModel>>,
    embedding: OnceCell<Arc<dyn EmbeddingModel>>,
}

pub struct ModelRegistry {
    factory: Arc<dyn ModelFactory>,
    entries: HashMap<String, Entry>,
}

/// Both capabilities of one named model, for consumers that need either.
#[derive(Clone)]
pub struct ModelHandle {
    pub name: String,
    pub completion: Option<Arc<dyn CompletionModel>>,
    pub embedding: Option<Arc<dyn EmbeddingModel>>,
}

impl ModelHandle {
    /// The completion capability, or [`Error::Config`] if the model was
    /// not configured for that role.
    pub fn require_completion(&self) -> Result<Arc<dyn CompletionModel>> {
        self.completion.clone().ok_or_else(|| {
            Error::config(format!("model '{}' is not configured for the completion role", self.name))
        })
    }
}

impl ModelRegistry {
    /// Registry backed by the built-in providers.
    pub fn new(configs: Vec<ModelConfig>) -> Result<Self> {
        Self::with_factory(configs, Arc::new(BuiltinFactory))
    }

    /// Registry backed by a caller-supplied factory.
    ///
    /// Fails with [`Error::Config`] on a duplicated name or on a provider
    /// type the factory cannot serve for one of the configured roles.
    pub fn with_factory(configs: Vec<ModelConfig>, factory: Arc<dyn ModelFactory>) -> Result<Self> {
        let mut entries = HashMap::with_capacity(configs.len());
        for config in configs {
            if config.roles.is_empty() {
                return Err(Error::config(format!(
                    "model '{}' declares no roles",
                    config.name
                )));
            }
            for role in &config.roles {
                if !factory.supports(&config.kind, *role) {
                    return Err(Error::config(format!(
                        "model '{}': provider '{}' does not support the {} role",
                        config.name,
                        config.kind,
                        role.as_str()
                    )));
                }
            }
            if entries.contains_key(&config.name) {
                return Err(Error::config(format!(
                    "duplicated model name '{}'",
                    config.name
                )));
            }
            entries.insert(
                config.name.clone(),
                Entry {
                    config,
                    completion: OnceCell::new(),
                    embedding: OnceCell::new(),
                },
            );
        }
        Ok(Self { factory, entries })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// The completion capability of `name`, created on first use.
    pub async fn completion(&self, name: &str) -> Result<Arc<dyn CompletionModel>> {
        let entry = self.entry(name, Role::Completion)?;
        let model = entry
            .completion
            .get_or_try_init(|| async {
                tracing::info!(model = name, kind = %entry.config.kind, "creating completion model");
                self.factory
                    .create_completion(&entry.config)
                    .await
                    .map_err(Error::Upstream)
            })
            .await?;
        Ok(model.clone())
    }

    /// The embedding capability of `name`, created on first use.
    pub async fn embedding(&self, name: &str) -> Result<Arc<dyn EmbeddingModel>> {
        let entry = self.entry(name, Role::Embedding)?;
        let model = entry
            .embedding
            .get_or_try_init(|| async {
                tracing::info!(model = name, kind = %entry.config.kind, "creating embedding model");
                self.factory
                    .create_embedding(&entry.config)
                    .await
                    .map_err(Error::Upstream)
            })
            .await?;
        Ok(model.clone())
    }

    /// Every configured capability of `name`.
    pub async fn handle(&self, name: &str) -> Result<ModelHandle> {
        let config = &self
            .entries
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown model '{}'", name)))?
            .config;

        let completion = if config.has_role(Role::Completion) {
            Some(self.completion(name).await?)
        } else {
            None
        };
        let embedding = if config.has_role(Role::Embedding) {
            Some(self.embedding(name).await?)
        } else {
            None
        };

        Ok(ModelHandle {
            name: name.to_string(),
            completion,
            embedding,
        })
    }

    fn entry(&self, name: &str, role: Role) -> Result<&Entry> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown model '{}'", name)))?;
        if !entry.config.has_role(role) {
            return Err(Error::config(format!(
                "model '{}' is not configured for the {} role",
                name,
                role.as_str()
            )));
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EchoModel, FixedEmbedder};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts creations and takes a while to create, so racing callers overlap.
    #[derive(Default)]
    struct CountingFactory {
        completions: AtomicUsize,
        embeddings: AtomicUsize,
        fail_first: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ModelFactory for CountingFactory {
        fn supports(&self, kind: &str, _role: Role) -> bool {
            kind == "fake"
        }

        async fn create_completion(
            &self,
            _config: &ModelConfig,
        ) -> anyhow::Result<Arc<dyn CompletionModel>> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first.swap(false, Ordering::SeqCst) {
                anyhow::bail!("download interrupted");
            }
            self.completions.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(EchoModel))
        }

        async fn create_embedding(
            &self,
            _config: &ModelConfig,
        ) -> anyhow::Result<Arc<dyn EmbeddingModel>> {
            self.embeddings.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedEmbedder::new(vec![1.0, 0.0])))
        }
    }

    fn fake(name: &str) -> ModelConfig {
        ModelConfig::new(name, "fake")
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_once() {
        let factory = Arc::new(CountingFactory::default());
        let registry =
            Arc::new(ModelRegistry::with_factory(vec![fake("a")], factory.clone()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.completion("a").await.map(|_| ()) })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(factory.completions.load(Ordering::SeqCst), 1);
        let first = registry.completion("a").await.unwrap();
        let second = registry.completion("a").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_roles_are_created_independently() {
        let factory = Arc::new(CountingFactory::default());
        let registry = ModelRegistry::with_factory(vec![fake("a")], factory.clone()).unwrap();

        registry.embedding("a").await.unwrap();
        assert_eq!(factory.completions.load(Ordering::SeqCst), 0);
        assert_eq!(factory.embeddings.load(Ordering::SeqCst), 1);

        let handle = registry.handle("a").await.unwrap();
        assert!(handle.completion.is_some());
        assert!(handle.embedding.is_some());
        assert_eq!(factory.embeddings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_is_retried() {
        let factory = Arc::new(CountingFactory::default());
        factory.fail_first.store(true, Ordering::SeqCst);
        let registry = ModelRegistry::with_factory(vec![fake("a")], factory.clone()).unwrap();

        let err = registry.completion("a").await.err().unwrap();
        assert!(matches!(err, Error::Upstream(_)));
        registry.completion("a").await.unwrap();
        assert_eq!(factory.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = ModelRegistry::with_factory(
            vec![fake("a"), fake("a")],
            Arc::new(CountingFactory::default()),
        );
        assert!(matches!(result, Err(Error::Config(m)) if m.contains("duplicated")));
    }

    #[test]
    fn test_unsupported_provider_rejected() {
        let result = ModelRegistry::with_factory(
            vec![ModelConfig::new("x", "llamacpp")],
            Arc::new(CountingFactory::default()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unknown_name_and_missing_role() {
        let mut embed_only = fake("e");
        embed_only.roles = vec![Role::Embedding];
        let registry =
            ModelRegistry::with_factory(vec![embed_only], Arc::new(CountingFactory::default()))
                .unwrap();

        assert!(matches!(
            registry.completion("nope").await,
            Err(Error::Config(_))
        ));
        assert!(matches!(
            registry.completion("e").await,
            Err(Error::Config(m)) if m.contains("completion role")
        ));
        let handle = registry.handle("e").await.unwrap();
        assert!(handle.completion.is_none());
        assert!(handle.embedding.is_some());
        assert!(matches!(
            handle.require_completion(),
            Err(Error::Config(m)) if m.contains("model 'e'")
        ));
    }

    #[tokio::test]
    async fn test_builtin_hashing_embedder() {
        let mut config = ModelConfig::new("hash", "hashing");
        config.roles = vec![Role::Embedding];
        config.dims = Some(32);
        let registry = ModelRegistry::new(vec![config]).unwrap();
        let embedder = registry.embedding("hash").await.unwrap();
        assert_eq!(embedder.embed("hello").await.unwrap().len(), 32);
    }
}
