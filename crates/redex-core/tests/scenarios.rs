//! End-to-end scenarios from SPEC_FULL.md §8.4, exercised through the
//! public `Engine` API only. Each recursive program is expressed as a
//! host `Function` that calls itself via a `OnceLock`-captured
//! `TermPtr` (the same self-reference pattern `redex-cli`'s `build_fib`
//! uses), since a host procedure can apply terms already in hand but
//! can't allocate a brand-new top-level `Function` mid-reduction.
//!
//! Full Scott-encoded list processing (`head`/`tail`/`filter`/...) is
//! explicitly out of scope per spec.md §1 ("standard library of
//! lambda-calculus combinators ... list processing" is an external
//! collaborator). These scenarios still drive real recursive,
//! parallel-spawning reduction through the engine - the divide-and-conquer
//! structure (quicksort, n-queens, change-making) is expressed with plain
//! integer arguments and `ctx.par`/`ctx.force`, matching how
//! `examples/parfib/parfib.cc` and `examples/nqueens/nqueens.cc` split
//! work at a depth/size threshold - without requiring a list-combinator
//! standard library this crate doesn't implement.

use redex_core::config::RuntimeConfig;
use redex_core::engine::Engine;
use redex_core::error::Result;
use redex_core::term::value::Scalar;
use redex_core::term::{HostProc, ReduceCtx, TermPayload, TermPtr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

fn test_engine(workers: usize) -> Arc<Engine> {
    Engine::new(RuntimeConfig {
        workers,
        global_gc_interval_ms: 0,
        ..RuntimeConfig::default()
    })
    .unwrap()
}

fn force_int(ctx: &dyn ReduceCtx, t: TermPtr) -> i64 {
    let forced = ctx.force(t);
    match &forced.get().payload {
        TermPayload::Constant(scalar) => i64::try_from(scalar).expect("expected an int constant"),
        _ => panic!("did not reduce to a constant"),
    }
}

// --- Scenario 1: compute(add(constant(2), constant(3))) == 5 ----------

#[test]
fn scenario_1_arithmetic() {
    let engine = test_engine(2);
    let add: HostProc = Arc::new(|args, ctx| {
        let a = force_int(ctx, args[0]);
        let b = force_int(ctx, args[1]);
        ctx.mk_constant(Scalar::Int(a + b))
    });
    let add = engine.function(add, 2, Some("add"));
    let two = engine.constant(Scalar::Int(2));
    let three = engine.constant(Scalar::Int(3));
    let expr = engine.apply(engine.apply(add, two), three);

    let result: i64 = engine.compute(expr).unwrap();
    assert_eq!(result, 5);
}

// --- Scenario 2: change-making, grounded in examples/coins/coins.cc's
// `payN` ----------------------------------------------------------------

/// Number of ways to make `total` using `coins[coin_idx..]`, each coin a
/// `(denomination, quantity)` pair - the recursive structure of
/// `payN(val, coins)` in `coins.cc`, with the coin list supplied as a
/// captured Rust slice (out-of-scope list processing) rather than a
/// Scott-encoded term list.
fn ways_reference(total: i64, coins: &[(i64, i64)], coin_idx: usize) -> u64 {
    if total == 0 {
        return 1;
    }
    if coin_idx >= coins.len() {
        return 0;
    }
    let (denom, qty) = coins[coin_idx];
    let mut ways = 0;
    let mut used = 0;
    while used <= qty && denom * used <= total {
        ways += ways_reference(total - denom * used, coins, coin_idx + 1);
        used += 1;
    }
    ways
}

#[test]
fn scenario_2_change_making() {
    let engine = test_engine(4);
    let coins = Arc::new(vec![(25i64, 1i64), (10, 2), (5, 5), (1, 10)]);
    let pay_cell: Arc<OnceLock<TermPtr>> = Arc::new(OnceLock::new());
    let pay_cell_body = Arc::clone(&pay_cell);
    let coins_body = Arc::clone(&coins);

    let host_proc: HostProc = Arc::new(move |args, ctx| {
        let total = force_int(ctx, args[0]);
        let coin_idx = force_int(ctx, args[1]) as usize;

        if total == 0 {
            return ctx.mk_constant(Scalar::Int(1));
        }
        if coin_idx >= coins_body.len() {
            return ctx.mk_constant(Scalar::Int(0));
        }
        let (denom, qty) = coins_body[coin_idx];
        let pay = *pay_cell_body.get().expect("pay called before self-reference settled");

        let mut sum = 0i64;
        let mut used = 0;
        while used <= qty && denom * used <= total {
            let remaining = ctx.mk_constant(Scalar::Int(total - denom * used));
            let next_idx = ctx.mk_constant(Scalar::Int((coin_idx + 1) as i64));
            let call = ctx.mk_apply(ctx.mk_apply(pay, remaining), next_idx);
            sum += force_int(ctx, call);
            used += 1;
        }
        ctx.mk_constant(Scalar::Int(sum))
    });

    let pay = engine.function(host_proc, 2, Some("payN"));
    pay_cell.set(pay).ok();

    let total = engine.constant(Scalar::Int(30));
    let zero = engine.constant(Scalar::Int(0));
    let call = engine.apply(engine.apply(pay, total), zero);

    let result: i64 = engine.compute(call).unwrap();
    assert_eq!(result as u64, ways_reference(30, &coins, 0));
}

// --- Scenario 3: quicksort, grounded in
// examples/quicksort/quicksort.cc's `quicksortD` depth-limited split ---

/// Deterministic xorshift generator so the scenario is reproducible
/// without depending on the `rand` crate's seeding (`seed=42` per
/// spec.md §8.4's scenario table).
fn seeded_ints(seed: u64, n: usize) -> Vec<i64> {
    let mut state = seed.wrapping_mul(2_685_821_657_736_338_717).wrapping_add(1);
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 100_000) as i64
        })
        .collect()
}

#[test]
fn scenario_3_quicksort_depth_limited_parallel() {
    let engine = test_engine(4);
    let values = Arc::new(seeded_ints(42, 1000));
    let expected_sum: i64 = values.iter().sum();

    // qsort(lo, hi, depth) returns the sorted slice values[lo..hi] as a
    // freshly globalized constant-free side effect written into `out`;
    // the engine drives the recursion and its `par` spawns, the actual
    // partition/compare happens in the host closure (list processing is
    // out of scope per spec.md §1).
    let out: Arc<parking_lot::Mutex<Vec<i64>>> =
        Arc::new(parking_lot::Mutex::new(vec![0; values.len()]));

    let qsort_cell: Arc<OnceLock<TermPtr>> = Arc::new(OnceLock::new());
    let qsort_cell_body = Arc::clone(&qsort_cell);
    let values_body = Arc::clone(&values);
    let out_body = Arc::clone(&out);
    const DEPTH_LIMIT: i64 = 3;

    let host_proc: HostProc = Arc::new(move |args, ctx| {
        let lo = force_int(ctx, args[0]) as usize;
        let hi = force_int(ctx, args[1]) as usize;
        let depth = force_int(ctx, args[2]);

        if hi <= lo {
            return ctx.mk_constant(Scalar::Int(0));
        }
        let mut slice: Vec<i64> = values_body[lo..hi].to_vec();
        if hi - lo <= 1 || depth > DEPTH_LIMIT {
            slice.sort_unstable();
            out_body.lock()[lo..hi].copy_from_slice(&slice);
            return ctx.mk_constant(Scalar::Int(0));
        }

        let pivot = slice[0];
        let mut less = Vec::new();
        let mut equal = Vec::new();
        let mut greater = Vec::new();
        for v in slice.drain(..) {
            match v.cmp(&pivot) {
                std::cmp::Ordering::Less => less.push(v),
                std::cmp::Ordering::Equal => equal.push(v),
                std::cmp::Ordering::Greater => greater.push(v),
            }
        }
        let mid = lo + less.len();
        let hi_start = mid + equal.len();
        {
            let mut out = out_body.lock();
            out[lo..mid].copy_from_slice(&less);
            out[mid..hi_start].copy_from_slice(&equal);
            out[hi_start..hi].copy_from_slice(&greater);
        }

        let qsort = *qsort_cell_body.get().expect("qsort called before self-reference settled");
        let next_depth = ctx.mk_constant(Scalar::Int(depth + 1));

        let left_call = ctx.mk_apply(
            ctx.mk_apply(ctx.mk_apply(qsort, ctx.mk_constant(Scalar::Int(lo as i64))), ctx.mk_constant(Scalar::Int(mid as i64))),
            next_depth,
        );
        let right_call = ctx.mk_apply(
            ctx.mk_apply(ctx.mk_apply(qsort, ctx.mk_constant(Scalar::Int(hi_start as i64))), ctx.mk_constant(Scalar::Int(hi as i64))),
            next_depth,
        );
        let right_call = ctx.par(right_call);

        ctx.force(left_call);
        ctx.force(right_call);
        ctx.mk_constant(Scalar::Int(0))
    });

    let qsort = engine.function(host_proc, 3, Some("quicksortD"));
    qsort_cell.set(qsort).ok();

    let lo = engine.constant(Scalar::Int(0));
    let hi = engine.constant(Scalar::Int(values.len() as i64));
    let depth0 = engine.constant(Scalar::Int(0));
    let call = engine.apply(engine.apply(engine.apply(qsort, lo), hi), depth0);

    let _: i64 = engine.compute(call).unwrap();

    let sorted = out.lock().clone();
    let mut expected = (*values).clone();
    expected.sort_unstable();
    assert_eq!(sorted, expected);
    assert_eq!(sorted.iter().sum::<i64>(), expected_sum);
}

// --- Scenario 4: n-queens(8) == 92, grounded in
// examples/nqueens/nqueens.cc's bitmask-style column/diagonal tracking -

fn count_solutions(n: i64, row: i64, cols: u32, diag_a: u32, diag_b: u32) -> u64 {
    if row == n {
        return 1;
    }
    let mut count = 0;
    for col in 0..n {
        let c = 1u32 << col;
        let a = 1u32 << (row + col);
        let b = 1u32 << (row - col + n);
        if cols & c != 0 || diag_a & a != 0 || diag_b & b != 0 {
            continue;
        }
        count += count_solutions(n, row + 1, cols | c, diag_a | a, diag_b | b);
    }
    count
}

#[test]
fn scenario_4_nqueens_eight_is_ninety_two() {
    let engine = test_engine(4);
    const N: i64 = 8;
    const PAR_THRESHOLD: i64 = 3;

    let solve_cell: Arc<OnceLock<TermPtr>> = Arc::new(OnceLock::new());
    let solve_cell_body = Arc::clone(&solve_cell);

    // args: row, cols, diag_a, diag_b - all plain ints, matching an
    // arity-4 `Function` (the engine's max supported arity is 5).
    let host_proc: HostProc = Arc::new(move |args, ctx| {
        let row = force_int(ctx, args[0]);
        let cols = force_int(ctx, args[1]) as u32;
        let diag_a = force_int(ctx, args[2]) as u32;
        let diag_b = force_int(ctx, args[3]) as u32;

        if row == N {
            return ctx.mk_constant(Scalar::Int(1));
        }
        let solve = *solve_cell_body.get().expect("solve called before self-reference settled");

        let mut branches = Vec::new();
        for col in 0..N {
            let c = 1u32 << col;
            let a = 1u32 << (row + col);
            let b = 1u32 << (row - col + N);
            if cols & c != 0 || diag_a & a != 0 || diag_b & b != 0 {
                continue;
            }
            let call = ctx.mk_apply(
                ctx.mk_apply(
                    ctx.mk_apply(ctx.mk_apply(solve, ctx.mk_constant(Scalar::Int(row + 1))), ctx.mk_constant(Scalar::Int((cols | c) as i64))),
                    ctx.mk_constant(Scalar::Int((diag_a | a) as i64)),
                ),
                ctx.mk_constant(Scalar::Int((diag_b | b) as i64)),
            );
            let call = if row < PAR_THRESHOLD { ctx.par(call) } else { call };
            branches.push(call);
        }
        let total: i64 = branches.into_iter().map(|b| force_int(ctx, b)).sum();
        ctx.mk_constant(Scalar::Int(total))
    });

    let solve = engine.function(host_proc, 4, Some("pargen"));
    solve_cell.set(solve).ok();

    let args = [0i64, 0, 0, 0].map(|v| engine.constant(Scalar::Int(v)));
    let call = args.into_iter().fold(solve, |f, a| engine.apply(f, a));

    let result: i64 = engine.compute(call).unwrap();
    assert_eq!(result, 92);
    assert_eq!(result as u64, count_solutions(N, 0, 0, 0, 0));
}

// --- Scenario 5: parallel fibonacci, n=20, threshold 10 -> 6765 --------

#[test]
fn scenario_5_parallel_fibonacci() {
    let engine = test_engine(4);
    const THRESHOLD: i64 = 10;

    let fib_cell: Arc<OnceLock<TermPtr>> = Arc::new(OnceLock::new());
    let fib_cell_body = Arc::clone(&fib_cell);

    let host_proc: HostProc = Arc::new(move |args, ctx| {
        let n = force_int(ctx, args[0]);
        if n <= 1 {
            return ctx.mk_constant(Scalar::Int(n));
        }
        let fib = *fib_cell_body.get().expect("fib called before self-reference settled");
        let left = ctx.mk_apply(fib, ctx.mk_constant(Scalar::Int(n - 1)));
        let right = ctx.mk_apply(fib, ctx.mk_constant(Scalar::Int(n - 2)));
        let right = if n > THRESHOLD { ctx.par(right) } else { right };
        ctx.mk_constant(Scalar::Int(force_int(ctx, left) + force_int(ctx, right)))
    });

    let fib = engine.function(host_proc, 1, Some("fib"));
    fib_cell.set(fib).ok();

    let call = engine.apply(fib, engine.constant(Scalar::Int(20)));
    let result: i64 = engine.compute(call).unwrap();
    assert_eq!(result, 6765);
}

// --- Scenario 6: a blackhole contended by 100 parallel demands runs its
// wrapped computation exactly once ---------------------------------------

#[test]
fn scenario_6_contended_blackhole_runs_exactly_once() {
    let engine = test_engine(4);
    let counter = Arc::new(AtomicU64::new(0));
    let counter_body = Arc::clone(&counter);

    let expensive: HostProc = Arc::new(move |_args, ctx| {
        counter_body.fetch_add(1, Ordering::SeqCst);
        ctx.mk_constant(Scalar::Int(42))
    });
    let f = engine.function(expensive, 0, Some("expensive"));
    let shared = engine.heap.alloc_blackhole(0, f).unwrap().globalize();

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || -> Result<i64> {
                let r = engine.eval(shared, redex_core::reducer::EvalMode::Forced);
                match &r.get().payload {
                    TermPayload::Constant(s) => Ok(i64::try_from(s).unwrap()),
                    _ => panic!("expected a constant"),
                }
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap().unwrap(), 42);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
