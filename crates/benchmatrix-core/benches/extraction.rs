use criterion::{black_box, criterion_group, criterion_main, Criterion};

use benchmatrix_core::extract::{extract_code, strip_tool_logs};
use benchmatrix_core::model::Language;

fn bench_extract_code(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_code");

    let tagged = r#"Here is the module:

```typescript
export function add(a: number, b: number): number {
  return a + b;
}
```
"#;

    let mixed = r#"I will create the file now.

```bash
npm init -y
```

```ts
export class Counter {
  private n = 0;
  inc(): number { return ++this.n; }
}
```

```javascript
module.exports = {};
```
"#;

    let heuristic = "Sure! Below is the implementation.\n\nexport function double(x: number): number {\n  return x * 2;\n}\n";

    let agent_log = {
        let mut s = String::new();
        for i in 0..40 {
            s.push_str(&format!("\x1b[32m─── tool call {i} ───\x1b[0m\n"));
            s.push_str("Reading file src/index.ts\n");
        }
        s.push_str("```ts\nexport const answer = 42;\n```\n");
        s
    };

    group.bench_function("tagged", |b| {
        b.iter(|| extract_code(black_box(tagged), Language::TypeScript))
    });

    group.bench_function("mixed_blocks", |b| {
        b.iter(|| extract_code(black_box(mixed), Language::TypeScript))
    });

    group.bench_function("heuristic", |b| {
        b.iter(|| extract_code(black_box(heuristic), Language::TypeScript))
    });

    group.bench_function("agent_log", |b| {
        b.iter(|| extract_code(black_box(&agent_log), Language::TypeScript))
    });

    group.bench_function("strip_tool_logs", |b| {
        b.iter(|| strip_tool_logs(black_box(&agent_log)))
    });

    group.finish();
}

criterion_group!(benches, bench_extract_code);
criterion_main!(benches);
