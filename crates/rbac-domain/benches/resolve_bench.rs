//! Benchmark for effective policy resolution.
//!
//! Run with: cargo bench -p rbac-domain

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rbac_domain::model::PolicyRef;
use rbac_domain::{DomainResult, PolicyResolver, RoleGraphReader};

/// Static graph: `layers` levels of `width` roles, every role inheriting
/// from every role of the next level, so each level is a wide diamond.
struct LayeredGraph {
    parents: HashMap<String, Vec<String>>,
    policies: HashMap<String, Vec<PolicyRef>>,
}

impl LayeredGraph {
    fn new(layers: usize, width: usize) -> Self {
        let role = |layer: usize, i: usize| format!("role_{layer}_{i}");
        let mut parents = HashMap::new();
        let mut policies = HashMap::new();
        for layer in 0..layers {
            for i in 0..width {
                let id = role(layer, i);
                if layer + 1 < layers {
                    parents.insert(id.clone(), (0..width).map(|j| role(layer + 1, j)).collect());
                }
                policies.insert(
                    id.clone(),
                    vec![PolicyRef::new(format!("pol_{layer}_{i}"), &format!("res{layer}"), &format!("op{i}"))],
                );
            }
        }
        Self { parents, policies }
    }
}

#[async_trait]
impl RoleGraphReader for LayeredGraph {
    async fn parent_ids(&self, role_ids: &[String]) -> DomainResult<HashMap<String, Vec<String>>> {
        Ok(role_ids
            .iter()
            .filter_map(|id| self.parents.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    async fn direct_policies(&self, role_ids: &[String]) -> DomainResult<HashMap<String, Vec<PolicyRef>>> {
        Ok(role_ids
            .iter()
            .filter_map(|id| self.policies.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}

fn resolve_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let resolver = PolicyResolver::new(Arc::new(LayeredGraph::new(10, 8)));
    let seed = vec!["role_0_0".to_string()];

    c.bench_function("resolve_layered_diamond_10x8", |b| {
        b.to_async(&runtime).iter(|| async {
            let resolved = resolver.resolve(black_box(&seed)).await.expect("resolve");
            black_box(resolved)
        })
    });
}

criterion_group!(benches, resolve_benchmark);
criterion_main!(benches);
