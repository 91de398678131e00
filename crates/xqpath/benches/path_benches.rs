use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use xqpath::compiler::compile_xquery;
use xqpath::model::build::{attr, comment, doc, elem, text};
use xqpath::parser::parse_query;
use xqpath::{DynamicContextBuilder, Error, Node, evaluate};

fn sample_queries() -> Vec<&'static str> {
    vec![
        "/catalog/section/item[@type = 'a'][position() < 5]/@id",
        "count(//item)",
        "//item[last()]/preceding-sibling::item[1]/@id",
        "(//node() | //node()) except //comment()",
        "//section[item/@featured = 'true']/@name",
        "for $i in //item return comment { $i/@id, '-', string($i) }",
        "string-join(//item/ancestor::section/@name, ',')",
    ]
}

fn benchmark_parser(c: &mut Criterion) {
    let queries = sample_queries();
    c.bench_function("parser/parse_query", |b| {
        b.iter(|| {
            for q in &queries {
                let ast = parse_query(black_box(q)).expect("parse failure");
                black_box(ast);
            }
        })
    });
}

fn benchmark_compiler(c: &mut Criterion) {
    let queries = sample_queries();
    c.bench_function("compiler/compile_xquery", |b| {
        b.iter(|| {
            for q in &queries {
                let compiled = compile_xquery(black_box(q)).expect("compile failure");
                black_box(compiled);
            }
        })
    });
}

/// A catalog with `sections` sections of `items` items each.
fn build_catalog(sections: usize, items: usize) -> Node {
    let mut catalog = elem("catalog").attr(attr("xml:lang", "en"));
    for s in 0..sections {
        let mut section = elem("section").attr(attr("name", &format!("s{s}")));
        for i in 0..items {
            let kind = if i % 2 == 0 { "a" } else { "b" };
            let mut item = elem("item").attr(attr("id", &format!("item-{s}-{i}"))).attr(attr("type", kind));
            if i % 7 == 0 {
                item = item.attr(attr("featured", "true"));
            }
            section = section.child(item.child(text(&format!("Item {i}"))));
            if i % 5 == 0 {
                section = section.child(comment("separator"));
            }
        }
        catalog = catalog.child(section);
    }
    doc().child(catalog).build()
}

fn prepared_compiled_queries() -> Result<Vec<(String, xqpath::CompiledXQuery)>, Error> {
    sample_queries()
        .into_iter()
        .map(|q| compile_xquery(q).map(|c| (q.to_string(), c)))
        .collect()
}

fn benchmark_evaluator(c: &mut Criterion) {
    let compiled = prepared_compiled_queries().expect("compile failure");
    for (sections, items) in [(4, 10), (20, 50)] {
        let ctx = DynamicContextBuilder::new().with_context_item(build_catalog(sections, items)).build();
        let mut group = c.benchmark_group(format!("evaluator/{}x{}", sections, items));
        for (name, program) in &compiled {
            group.bench_with_input(BenchmarkId::from_parameter(name), program, |b, prog| {
                b.iter(|| {
                    let result = evaluate(prog, black_box(&ctx)).expect("eval failure");
                    black_box(result.len());
                });
            });
        }
        group.finish();
    }
}

criterion_group!(benches, benchmark_parser, benchmark_compiler, benchmark_evaluator);
criterion_main!(benches);
