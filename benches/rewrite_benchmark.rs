use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sql_dao::Dialect;
use sql_dao::translation::{count_statement, rewrite_placeholders};
use std::hint::black_box;

// Generate a deterministic WHERE clause with `n` placeholders and a few quoted decoys
fn generate_select(n: usize) -> String {
    let mut sql = String::from("SELECT id, name, 'what?' AS q FROM t_user WHERE 1=1");
    for i in 0..n {
        if i % 5 == 0 {
            sql.push_str(" AND note <> 'is it?'");
        }
        sql.push_str(&format!(" AND c{i} = ?"));
    }
    sql.push_str(" ORDER BY id");
    sql
}

fn bench_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite_placeholders");
    for n in [1usize, 10, 100] {
        let sql = generate_select(n);
        for dialect in [Dialect::Postgres, Dialect::Oracle, Dialect::Sqlite] {
            group.bench_with_input(
                BenchmarkId::new(dialect.as_str(), n),
                &sql,
                |b, sql| b.iter(|| rewrite_placeholders(black_box(dialect), black_box(sql))),
            );
        }
    }
    group.finish();
}

fn bench_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("count_statement");
    let cases = [
        ("splice", generate_select(10)),
        ("distinct", "SELECT DISTINCT a, b FROM t WHERE x = ? ORDER BY a".to_string()),
        (
            "union",
            "SELECT a FROM t1 WHERE x = ? UNION SELECT a FROM t2 ORDER BY a".to_string(),
        ),
    ];
    for (name, sql) in &cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), sql, |b, sql| {
            b.iter(|| count_statement(black_box(Dialect::Postgres), black_box(sql)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rewrite, bench_count);
criterion_main!(benches);
