use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use kg_rag::cache::NodeContextSnapshot;
use kg_rag::graph::GraphNode;
use kg_rag::retrieval::structured::extract_cypher;
use kg_rag::retrieval::validator::{AllowListValidator, QueryValidator, ReadOnlyValidator};
use kg_rag::ResolvedQuery;

fn nodes(size: usize) -> Vec<GraphNode> {
    (0..size)
        .map(|i| {
            let name = format!("Company {}", i);
            let name = (i % 7 != 0).then_some(name.as_str());
            GraphNode::new(format!("4:b16o2424:{}", i), &["Company", "Listed"], name)
        })
        .collect()
}

/// Render a snapshot and parse it back
fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 1000, 10_000].iter() {
        let nodes = nodes(*size);
        group.bench_with_input(BenchmarkId::new("render", size), &nodes, |b, nodes| {
            b.iter(|| {
                let snapshot = NodeContextSnapshot::from_nodes(nodes);
                criterion::black_box(snapshot.render().len());
            });
        });

        let text = NodeContextSnapshot::from_nodes(&nodes).render();
        group.bench_with_input(BenchmarkId::new("parse", size), &text, |b, text| {
            b.iter(|| {
                let snapshot = NodeContextSnapshot::from_text(text);
                criterion::black_box(snapshot.nodes().len());
            });
        });
    }
    group.finish();
}

/// Parse resolver output of growing identifier lists
fn bench_resolver_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver_parse");

    for ids in [1, 10, 100].iter() {
        let list: Vec<String> = (0..*ids).map(|i| format!("\"4:b16o2424:{}\"", i)).collect();
        let raw = format!(
            "Answer: What are the risks associated with Adani Enterprises Limited?\nRelevant Node IDs: [{}]",
            list.join(", ")
        );
        group.bench_with_input(BenchmarkId::from_parameter(ids), &raw, |b, raw| {
            b.iter(|| criterion::black_box(ResolvedQuery::parse(raw).node_ids.len()));
        });
    }
    group.finish();
}

/// Clean and validate a generated query
fn bench_query_checks(c: &mut Criterion) {
    let response = "Here is the query:\n```cypher\nMATCH (c:Company {name: 'Acme'})-[:HAS_RISK]->(r:Risk)\nOPTIONAL MATCH (c)-[:MANAGED_BY]->(e:Executive)\nRETURN r.type, r.value, e.name\n```";
    let read_only = ReadOnlyValidator;
    let allow = AllowListValidator::new(["Company", "Executive", "Risk", "HAS_RISK", "MANAGED_BY"]);

    c.bench_function("extract_and_validate", |b| {
        b.iter(|| {
            let cypher = extract_cypher(response);
            criterion::black_box(read_only.validate(&cypher).is_ok() && allow.validate(&cypher).is_ok());
        });
    });
}

criterion_group!(benches, bench_snapshot, bench_resolver_parse, bench_query_checks);
criterion_main!(benches);
