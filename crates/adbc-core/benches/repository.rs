use criterion::{black_box, criterion_group, criterion_main, Criterion};

use adbc_core::{Config, DeclKey, Enforcer, Program, Value};

const BANK: &str = include_str!("../../../tests/fixtures/bank.json");

fn enforcer() -> Enforcer {
    let model = Program::from_json(BANK)
        .and_then(|p| p.build())
        .unwrap_or_else(|e| panic!("bank fixture: {}", e));
    model
        .enforcer(Config::default())
        .unwrap_or_else(|e| panic!("enforcer: {}", e))
}

fn repository_benchmark(c: &mut Criterion) {
    let e = enforcer();
    let withdraw = DeclKey::method("SavingsAccount", "withdraw", ["double"]);

    c.bench_function("cached_precondition", |b| {
        e.repository().precondition(&withdraw).ok();
        b.iter(|| black_box(e.repository().precondition(black_box(&withdraw))))
    });

    c.bench_function("cold_precondition", |b| {
        b.iter(|| {
            e.repository().reset();
            black_box(e.repository().precondition(black_box(&withdraw)))
        })
    });
}

fn check_benchmark(c: &mut Criterion) {
    let e = enforcer();
    let withdraw = DeclKey::method("SavingsAccount", "withdraw", ["double"]);
    let mut ctx = e.context();
    ctx.bind_receiver(Value::from_json(&serde_json::json!({ "balance": 50.0, "rate": 0.01 })));
    e.bind_arguments(&withdraw, &mut ctx, vec![Value::Float(10.0)]);

    c.bench_function("check_pre", |b| {
        b.iter(|| black_box(e.check_pre(&withdraw, &ctx).is_ok()))
    });
}

criterion_group!(benches, repository_benchmark, check_benchmark);
criterion_main!(benches);
