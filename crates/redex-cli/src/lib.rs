//! redex-cli - process surface for the redex-core engine (spec.md §6.2).
//!
//! A thin driver in the style of a compiler driver's `main()`/`Session`
//! split: `main.rs` only decodes the process exit code, everything else
//! lives here so it can be exercised without `std::process::exit`.
//!
//! There is no surface-syntax parser (out of scope, per spec.md §1's
//! "a surface syntax parser / compiler front end" non-goal) so there is
//! no user program to load. What this crate demonstrates instead is the
//! process contract itself: argv is converted to integers (0 for
//! anything unparseable) and handed to "the program's main" as a lazy
//! list, built the same Scott-encoding way the original's hard-coded
//! example binaries (`examples/parfib/parfib.cc`, `examples/misc/fib.cc`)
//! read their own `args` parameter with `head`/`lindex`. The program run
//! against that list is a parallel Fibonacci, mirroring `parfib.cc`'s
//! `par`/threshold split.

use anyhow::Context;
use redex_core::config::RuntimeConfig;
use redex_core::engine::Engine;
use redex_core::reducer::EvalMode;
use redex_core::term::value::Scalar;
use redex_core::term::{HostProc, TermPayload, TermPtr};
use std::sync::{Arc, OnceLock};

/// `nil = \n c. n` - arity 2: the two continuations a consumer supplies
/// (what to do on empty, what to do on a cell) and nil always picks the
/// first.
fn nil_function(engine: &Arc<Engine>) -> TermPtr {
    let host_proc: HostProc = Arc::new(|args, _ctx| args[0]);
    engine.function(host_proc, 2, Some("nil"))
}

/// `cons h t = \n c. c h t`, folded into one arity-4 function (h, t, n,
/// c) since this engine's `Function` terms can't return a freshly
/// allocated `Function` of their own - only applications of terms
/// already in hand. A cell built with just `h`/`t` applied (2 of 4 args)
/// stays under-saturated and therefore non-reducible, which is exactly
/// the "data value, not yet consumed" behavior a Scott-encoded
/// constructor needs.
fn cons_function(engine: &Arc<Engine>) -> TermPtr {
    let host_proc: HostProc = Arc::new(|args, ctx| {
        let (h, t, c) = (args[0], args[1], args[3]);
        ctx.mk_apply(ctx.mk_apply(c, h), t)
    });
    engine.function(host_proc, 4, Some("cons"))
}

/// Build the lazy list `values.0 :: values.1 :: ... :: nil`.
fn build_arg_list(engine: &Arc<Engine>, values: &[i64]) -> TermPtr {
    let nil = nil_function(engine);
    let cons = cons_function(engine);
    values.iter().rev().fold(nil, |tail, &v| {
        let head = engine.constant(Scalar::Int(v));
        engine.apply(engine.apply(cons, head), tail)
    })
}

/// Apply a list to its two continuations and force the result - the
/// only way to read anything back out of a Scott-encoded value.
fn select(engine: &Arc<Engine>, list: TermPtr, n_branch: TermPtr, c_branch: TermPtr) -> TermPtr {
    let applied = engine.apply(engine.apply(list, n_branch), c_branch);
    engine.eval(applied, EvalMode::Forced)
}

/// `head(list)`, defaulting to `default` if `list` is `nil`.
fn list_head(engine: &Arc<Engine>, list: TermPtr, default: i64) -> TermPtr {
    let sel_head: HostProc = Arc::new(|args, _ctx| args[0]);
    let sel_head = engine.function(sel_head, 2, Some("sel_head"));
    let default = engine.constant(Scalar::Int(default));
    select(engine, list, default, sel_head)
}

/// `tail(list)` - `nil` on `nil`, the rest of the list on a cell.
fn list_tail(engine: &Arc<Engine>, list: TermPtr) -> TermPtr {
    let sel_tail: HostProc = Arc::new(|args, _ctx| args[1]);
    let sel_tail = engine.function(sel_tail, 2, Some("sel_tail"));
    let nil = nil_function(engine);
    select(engine, list, nil, sel_tail)
}

/// `nth(list, k)`, matching the original's `lindex(args)(k)`.
fn list_nth(engine: &Arc<Engine>, list: TermPtr, index: usize, default: i64) -> i64 {
    let mut cursor = list;
    for _ in 0..index {
        cursor = list_tail(engine, cursor);
    }
    let head = list_head(engine, cursor, default);
    match &head.get().payload {
        TermPayload::Constant(scalar) => i64::try_from(scalar).unwrap_or(default),
        _ => default,
    }
}

/// Parse one argv entry per spec.md §6.2: "the runtime converts each to
/// an integer if parseable, else to 0".
fn parse_arg(s: &str) -> i64 {
    s.parse::<i64>().unwrap_or(0)
}

/// The parallel-Fibonacci program the CLI runs against `args`, grounded
/// in `examples/parfib/parfib.cc`: branches above `threshold` spawn
/// their right subtree with `par` and force it after the left, branches
/// at or below it run straight-line. Self-reference is threaded through
/// a `OnceLock` since a host procedure can only apply terms already in
/// hand, not allocate a new `Function` mid-reduction.
fn build_fib(engine: &Arc<Engine>, threshold: i64) -> TermPtr {
    let fib_cell: Arc<OnceLock<TermPtr>> = Arc::new(OnceLock::new());
    let fib_cell_body = Arc::clone(&fib_cell);

    let host_proc: HostProc = Arc::new(move |args, ctx| {
        let n_term = ctx.force(args[0]);
        let n = match &n_term.get().payload {
            TermPayload::Constant(scalar) => {
                i64::try_from(scalar).expect("fib: argument is not an int")
            }
            _ => panic!("fib: argument did not reduce to a constant"),
        };

        if n <= 1 {
            return ctx.mk_constant(Scalar::Int(n));
        }

        let fib_term = *fib_cell_body.get().expect("fib: called before its own definition settled");
        let left = ctx.mk_apply(fib_term, ctx.mk_constant(Scalar::Int(n - 1)));
        let right = ctx.mk_apply(fib_term, ctx.mk_constant(Scalar::Int(n - 2)));

        let right = if n > threshold { ctx.par(right) } else { right };

        let left_val = ctx.force(left);
        let right_val = ctx.force(right);
        let (TermPayload::Constant(a), TermPayload::Constant(b)) =
            (&left_val.get().payload, &right_val.get().payload)
        else {
            panic!("fib: a branch did not reduce to a constant");
        };
        ctx.mk_constant(a.add(b).expect("fib: non-numeric branch result"))
    });

    let fib = engine.function(host_proc, 1, Some("fib"));
    fib_cell.set(fib).ok();
    fib
}

/// Run the CLI end to end and return the process exit code (spec.md
/// §6.2: "program's integer result modulo 256; SIGINT-interrupted
/// process exits with 128 + SIGINT"). Engine start-up failures are
/// reported through `anyhow`, matching the teacher driver crate's
/// convention of wrapping library errors with `.context(..)` at the
/// binary's top level rather than threading a bespoke error type through
/// `main`.
pub fn run(args: &[String]) -> i32 {
    let config = RuntimeConfig::from_env();
    let engine = match Engine::new(config).context("failed to start the redex engine") {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("redex: {e:#}");
            return 1;
        }
    };

    let values: Vec<i64> = args.iter().skip(1).map(|s| parse_arg(s)).collect();
    let arg_list = build_arg_list(&engine, &values);

    let n = list_nth(&engine, arg_list, 0, 10);
    let threshold = list_nth(&engine, arg_list, 1, n / 2);

    log::info!("computing fib({n}) with a par threshold of {threshold}");

    let fib = build_fib(&engine, threshold);
    let call = engine.apply(fib, engine.constant(Scalar::Int(n)));

    let result: Result<i64, _> = engine.compute(call);

    if engine.was_interrupted() {
        return 128 + 2;
    }

    match result {
        Ok(v) => {
            println!("{v}");
            (v.rem_euclid(256)) as i32
        }
        Err(e) => {
            eprintln!("redex: {e}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unparseable_args_as_zero() {
        assert_eq!(parse_arg("7"), 7);
        assert_eq!(parse_arg("not-a-number"), 0);
        assert_eq!(parse_arg("-3"), -3);
    }

    #[test]
    fn list_round_trips_through_cons_and_nth() {
        let engine = Engine::new(RuntimeConfig {
            workers: 2,
            global_gc_interval_ms: 0,
            ..RuntimeConfig::default()
        })
        .unwrap();
        let list = build_arg_list(&engine, &[10, 20, 30]);
        assert_eq!(list_nth(&engine, list, 0, -1), 10);
        assert_eq!(list_nth(&engine, list, 1, -1), 20);
        assert_eq!(list_nth(&engine, list, 2, -1), 30);
        assert_eq!(list_nth(&engine, list, 3, -1), -1);
    }

    #[test]
    fn fib_of_ten_is_fifty_five() {
        let engine = Engine::new(RuntimeConfig {
            workers: 4,
            global_gc_interval_ms: 0,
            ..RuntimeConfig::default()
        })
        .unwrap();
        let fib = build_fib(&engine, 5);
        let call = engine.apply(fib, engine.constant(Scalar::Int(10)));
        let result: i64 = engine.compute(call).unwrap();
        assert_eq!(result, 55);
    }

    #[test]
    fn run_computes_fib_from_argv_and_exits_with_result_mod_256() {
        let args: Vec<String> = vec!["redex".to_string(), "12".to_string(), "3".to_string()];
        let code = run(&args);
        assert_eq!(code, 144 % 256);
    }
}
