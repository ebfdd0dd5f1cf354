//! Serializes and parses a large synthetic family tree.

#![allow(missing_docs)]

use criterion::{Criterion, criterion_group, criterion_main};
use kinship::{ParentRole, Person, PersonGraph, PersonId, gedcom};

const PEOPLE: usize = 5_000;

/// Every person descends from the one at half their index, alternating
/// fathers and mothers, and neighbours are married in pairs.
fn pedigree() -> PersonGraph {
    let ids: Vec<PersonId> = (0..PEOPLE)
        .map(|i| PersonId::new(format!("P{i}")).unwrap())
        .collect();
    let people = ids
        .iter()
        .enumerate()
        .map(|(i, id)| Person::named(id.clone(), "en", &format!("Person {i}")))
        .collect();
    let mut graph = PersonGraph::from_people(people).unwrap();

    for child in 1..PEOPLE {
        let role = if child % 2 == 0 { ParentRole::Mother } else { ParentRole::Father };
        graph
            .connect_parent(&ids[(child - 1) / 2], &ids[child], role)
            .unwrap();
    }
    for pair in ids[1..].chunks_exact(2) {
        graph.connect_spouse(&pair[0], &pair[1]).unwrap();
    }
    graph
}

fn codec(c: &mut Criterion) {
    let graph = pedigree();
    let text = gedcom::build(graph.people(), "en", gedcom::default_labels).unwrap();

    c.bench_function("build gedcom", |b| {
        b.iter(|| gedcom::build(graph.people(), "en", gedcom::default_labels).unwrap());
    });

    c.bench_function("parse gedcom", |b| {
        b.iter(|| gedcom::parse(&text).unwrap());
    });
}

criterion_group!(benches, codec);
criterion_main!(benches);
