use criterion::{black_box, criterion_group, criterion_main, Criterion};
use regwasm::{Imports, Module, ModuleInstance, Runtime, WasmValue};

const FIBONACCI: &str = r#"(module
    (func (export "fibonacci") (param $n i32) (result i64)
        (local $a i64) (local $b i64) (local $t i64)
        (local.set $b (i64.const 1))
        (block
            (loop
                (br_if 1 (i32.le_s (local.get $n) (i32.const 0)))
                (local.set $t (i64.add (local.get $a) (local.get $b)))
                (local.set $a (local.get $b))
                (local.set $b (local.get $t))
                (local.set $n (i32.sub (local.get $n) (i32.const 1)))
                (br 0)))
        (local.get $a))

    (func $fib_rec (export "fibonacci_recursive") (param i32) (result i64)
        (if (result i64) (i32.lt_s (local.get 0) (i32.const 2))
            (then (i64.extend_i32_s (local.get 0)))
            (else (i64.add
                (call $fib_rec (i32.sub (local.get 0) (i32.const 1)))
                (call $fib_rec (i32.sub (local.get 0) (i32.const 2))))))))"#;

fn setup() -> (Runtime, ModuleInstance) {
    let wasm = wat::parse_str(FIBONACCI).expect("parse wat");
    let module = Module::parse_bytes(&wasm).expect("parse module");
    let mut runtime = Runtime::new();
    let instance = runtime.instantiate(&module, Imports::new()).expect("instantiate");
    (runtime, instance)
}

fn run(runtime: &mut Runtime, instance: &ModuleInstance, name: &str, n: i32) {
    let func = instance.exported_func(runtime, name).expect("exported_func");
    func.call(runtime, &[WasmValue::I32(n)]).expect("call");
}

fn criterion_benchmark(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("fibonacci");
        let (mut runtime, instance) = setup();
        group.bench_function("regwasm", |b| b.iter(|| run(&mut runtime, &instance, "fibonacci", black_box(60))));
    }

    {
        let mut group = c.benchmark_group("fibonacci-recursive");
        group.measurement_time(std::time::Duration::from_secs(5));
        let (mut runtime, instance) = setup();
        group.bench_function("regwasm", |b| {
            b.iter(|| run(&mut runtime, &instance, "fibonacci_recursive", black_box(26)))
        });
    }
}

criterion_group!(
    name = benches;
    config = Criterion::default().significance_level(0.1);
    targets = criterion_benchmark
);

criterion_main!(benches);
