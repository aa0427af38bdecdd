use criterion::{criterion_group, criterion_main, Criterion};
use vimre::{CompileOptions, Lines, Position, Searcher, SingleLine};

macro_rules! gen_bench {
    ($name:ident, $samples:expr, $desc:literal, $pattern:literal, $data:expr) => {
        fn $name(c: &mut Criterion) {
            let mut group = c.benchmark_group($desc);

            group.sample_size($samples);

            let program =
                vimre::compile($pattern, &CompileOptions::new()).unwrap();

            group.bench_function("hints", |b| {
                let searcher = Searcher::new(&program);
                let text = Lines::from_text($data);
                b.iter(|| {
                    let _ = searcher.find_all(&text, Position::default());
                });
            });

            group.bench_function("no hints", |b| {
                let mut searcher = Searcher::new(&program);
                searcher.disable_optimizations(true);
                let text = Lines::from_text($data);
                b.iter(|| {
                    let _ = searcher.find_all(&text, Position::default());
                });
            });
        }
    };
}

const TEXT: &str = "fabadafabafabadafabafabafafabadafabafabadafabafabafafabadafabafabadafabafabafa
the quick brown fox jumps over the lazy dog
  fn main() { println!(\"hello world\"); }
fabadafabafabadafabafabafafabadafabafabadafabafabafafabadafabafabadafabafabafa
";

gen_bench!(bench_literal, 500, "Literal", "fabada", TEXT);

gen_bench!(bench_word, 500, "Word", r"\<\w\+\>", TEXT);

gen_bench!(
    bench_backref,
    100,
    "Back reference",
    r"\(fa\%(ba\)\+\)da\1",
    TEXT
);

gen_bench!(bench_lookbehind, 100, "Lookbehind", r"\(lazy \)\@<=dog", TEXT);

fn bench_long_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("Long line");
    let line = "ab".repeat(5000) + "c";
    let program = vimre::compile(r"\(a\|b\)*c", &CompileOptions::new()).unwrap();
    let searcher = Searcher::new(&program);

    group.sample_size(50);
    group.bench_function("alternatives", |b| {
        let text = SingleLine::new(line.as_str());
        b.iter(|| {
            let _ = searcher.find(&text, Position::default());
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = bench_literal, bench_word, bench_backref, bench_lookbehind, bench_long_line);

criterion_main!(benches);
