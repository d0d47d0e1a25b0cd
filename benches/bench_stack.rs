#[macro_use]
extern crate criterion;

use criterion::Criterion;
use lockless::structures::{CountedStack, HazardStack, Optimized, Strict};

use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;

const OPS: u32 = 1000;

fn bench_counted_stack<P: lockless::structures::OrderingProfile + 'static>(num_threads: usize) {
    let stack: Arc<CountedStack<u32, P>> = Arc::new(CountedStack::new());
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for n in 0..OPS {
                s.push(n);
            }
        }));
    }
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..OPS {
                loop {
                    if s.pop().is_some() {
                        break;
                    }
                }
            }
        }));
    }
    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_hazard_stack(num_threads: usize) {
    let stack: Arc<HazardStack<u32>> = Arc::new(HazardStack::new());
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for n in 0..OPS {
                s.push(n);
            }
        }));
    }
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..OPS {
                loop {
                    if s.pop().is_some() {
                        break;
                    }
                }
            }
        }));
    }
    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_locked_stack(num_threads: usize) {
    let stack: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for n in 0..OPS {
                s.lock().unwrap().push(n);
            }
        }));
    }
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..OPS {
                loop {
                    if s.lock().unwrap().pop().is_some() {
                        break;
                    }
                }
            }
        }));
    }
    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_stack_low_contention(c: &mut Criterion) {
    c.bench_function("counted_stack_strict_low", |b| {
        b.iter(|| bench_counted_stack::<Strict>(4))
    });
    c.bench_function("counted_stack_optimized_low", |b| {
        b.iter(|| bench_counted_stack::<Optimized>(4))
    });
    c.bench_function("hazard_stack_low", |b| b.iter(|| bench_hazard_stack(4)));
    c.bench_function("locked_stack_low", |b| b.iter(|| bench_locked_stack(4)));
}

fn bench_stack_high_contention(c: &mut Criterion) {
    c.bench_function("counted_stack_strict_high", |b| {
        b.iter(|| bench_counted_stack::<Strict>(20))
    });
    c.bench_function("counted_stack_optimized_high", |b| {
        b.iter(|| bench_counted_stack::<Optimized>(20))
    });
    c.bench_function("hazard_stack_high", |b| b.iter(|| bench_hazard_stack(20)));
    c.bench_function("locked_stack_high", |b| b.iter(|| bench_locked_stack(20)));
}

criterion_group!(benches, bench_stack_low_contention, bench_stack_high_contention);
criterion_main!(benches);
