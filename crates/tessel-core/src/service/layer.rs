//! Layer - サービス binding の合成単位
//!
//! # 合成ルール
//! - `merge(a, b)`: binding の和集合。同じ tag が衝突したら **後ろの引数（b）が勝つ**（エラーではない）
//! - `provide(layer, dep)`: layer の constructor が dep の識別子を解決できるようにする。
//!   dep の構築は合成時ではなく、外側の constructor が実際に走ったときに行われる。
//!   結果の layer が公開するのは layer 側の識別子だけ。
//!
//! # 内部実装
//! - tag -> `Arc<Binding>` の HashMap
//! - 値は `Arc<dyn Any + Send + Sync>` に型消去して保持（TypedRegistry と同じ発想）

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use super::service::{Service, ServiceId};
use crate::domain::BindingId;
use crate::effect::Effect;

pub(crate) type AnyService = Arc<dyn Any + Send + Sync>;

pub(crate) enum Constructor {
    Value(AnyService),
    Effect {
        build: Effect<AnyService>,
        memoized: bool,
    },
}

pub(crate) struct Binding {
    pub(crate) id: BindingId,
    pub(crate) service: ServiceId,
    pub(crate) ctor: Arc<Constructor>,
    /// Layers made visible to the constructor, innermost first.
    pub(crate) deps: Vec<Layer>,
}

/// A set of service bindings.
#[derive(Clone, Default)]
pub struct Layer {
    bindings: HashMap<&'static str, Arc<Binding>>,
}

impl Layer {
    pub fn empty() -> Self {
        Self::default()
    }

    fn single<S: Service>(ctor: Constructor) -> Self {
        let binding = Binding {
            id: BindingId::generate(),
            service: ServiceId::of::<S>(),
            ctor: Arc::new(ctor),
            deps: Vec::new(),
        };
        let mut bindings = HashMap::new();
        bindings.insert(S::TAG, Arc::new(binding));
        Self { bindings }
    }

    /// Bind `S` to a precomputed value.
    pub fn succeed<S: Service>(value: S) -> Self {
        Self::single::<S>(Constructor::Value(Arc::new(value)))
    }

    /// Bind `S` to a lazy constructor that runs at most once per runtime
    /// instance. Its value, or its failure, is cached for every later resolution.
    pub fn effect<S: Service>(ctor: Effect<S>) -> Self {
        Self::single::<S>(Constructor::Effect {
            build: erase(ctor),
            memoized: true,
        })
    }

    /// Bind `S` to a constructor that runs again on every resolution, in the
    /// resolver's current scope.
    pub fn effect_fresh<S: Service>(ctor: Effect<S>) -> Self {
        Self::single::<S>(Constructor::Effect {
            build: erase(ctor),
            memoized: false,
        })
    }

    /// Let this layer's constructors resolve identifiers from `dependency`.
    pub fn provide(self, dependency: Layer) -> Self {
        let bindings = self
            .bindings
            .into_iter()
            .map(|(tag, binding)| {
                let mut deps = binding.deps.clone();
                deps.push(dependency.clone());
                let provided = Binding {
                    id: BindingId::generate(),
                    service: binding.service,
                    ctor: Arc::clone(&binding.ctor),
                    deps,
                };
                (tag, Arc::new(provided))
            })
            .collect();
        Self { bindings }
    }

    /// Union of both layers; `other` overrides on tag collision.
    pub fn merge(mut self, other: Layer) -> Self {
        for (tag, binding) in other.bindings {
            if self.bindings.insert(tag, binding).is_some() {
                tracing::debug!(tag, "service binding overridden by later layer");
            }
        }
        self
    }

    pub fn merge_all(layers: impl IntoIterator<Item = Layer>) -> Self {
        layers.into_iter().fold(Layer::empty(), Layer::merge)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.bindings.contains_key(tag)
    }

    /// Tags bound by this layer, sorted.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.bindings.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub(crate) fn bindings(&self) -> &HashMap<&'static str, Arc<Binding>> {
        &self.bindings
    }
}

fn erase<S: Service>(ctor: Effect<S>) -> Effect<AnyService> {
    ctor.map(|value| Arc::new(value) as AnyService)
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer").field("tags", &self.tags()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Adapter(&'static str);

    impl Service for Adapter {
        const TAG: &'static str = "test.adapter";
    }

    #[derive(Clone)]
    struct Queue;

    impl Service for Queue {
        const TAG: &'static str = "test.queue";
    }

    #[test]
    fn merge_unions_bindings() {
        let layer = Layer::succeed(Adapter("a")).merge(Layer::succeed(Queue));
        assert_eq!(layer.tags(), vec!["test.adapter", "test.queue"]);
    }

    #[test]
    fn merge_later_binding_wins() {
        let first = Layer::succeed(Adapter("first"));
        let second = Layer::succeed(Adapter("second"));
        let second_id = second.bindings()[Adapter::TAG].id;

        let merged = Layer::merge(first, second);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged.bindings()[Adapter::TAG].id, second_id);
    }

    #[test]
    fn provide_exposes_only_outer_tags() {
        let outer = Layer::effect(Effect::<Queue>::service().map(|_| Adapter("outer")));
        let provided = outer.provide(Layer::succeed(Queue));

        assert_eq!(provided.tags(), vec!["test.adapter"]);
        assert_eq!(provided.bindings()[Adapter::TAG].deps.len(), 1);
    }

    #[test]
    fn provide_creates_a_distinct_binding() {
        let outer = Layer::effect(Effect::succeed(Adapter("x")));
        let before = outer.bindings()[Adapter::TAG].id;
        let provided = outer.provide(Layer::empty());
        assert_ne!(provided.bindings()[Adapter::TAG].id, before);
    }

    #[test]
    fn merge_all_of_nothing_is_empty() {
        assert!(Layer::merge_all(Vec::new()).is_empty());
    }
}
