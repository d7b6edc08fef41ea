/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fault-tolerance and quorum arithmetic.
//!
//! A pool of `N` active nodes tolerates `f = floor((N - 1) / 3)` Byzantine nodes. From `f`:
//! - **commit** (`N - f`): matching commit votes needed to execute a batch.
//! - **view_change** (`N - f`): view change votes needed to install a new view.
//! - **weak** (`f + 1`): matching replies a client needs, and view change votes that make a replica join a
//!   view change it did not start itself.
//! - **majority** (`floor(N / 2) + 1`).
//!
//! Every function here is total: an empty pool has `f = 0` and quorums of 0 (commit) and 1 (weak).

/// The thresholds derived from the number of active nodes in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quorums {
    pub active: usize,
    pub f: usize,
    pub commit: usize,
    pub view_change: usize,
    pub weak: usize,
    pub majority: usize,
}

impl Quorums {
    pub const fn new(active: usize) -> Self {
        let f = max_faulty(active);
        Self {
            active,
            f,
            commit: active - f,
            view_change: active - f,
            weak: f + 1,
            majority: active / 2 + 1,
        }
    }
}

/// The number of Byzantine nodes a pool of `active` nodes tolerates.
pub const fn max_faulty(active: usize) -> usize {
    if active == 0 {
        0
    } else {
        (active - 1) / 3
    }
}

#[test]
fn max_faulty_steps_every_three_nodes() {
    let expected = [0, 0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3, 4];
    for (n, f) in expected.iter().enumerate() {
        assert_eq!(max_faulty(n), *f, "N = {}", n);
    }
}

#[test]
fn quorums_of_growing_pool() {
    let four = Quorums::new(4);
    assert_eq!((four.f, four.commit, four.weak, four.majority), (1, 3, 2, 3));

    let seven = Quorums::new(7);
    assert_eq!((seven.f, seven.commit, seven.weak, seven.majority), (2, 5, 3, 4));

    let eleven = Quorums::new(11);
    assert_eq!((eleven.f, eleven.commit, eleven.weak), (3, 8, 4));

    let empty = Quorums::new(0);
    assert_eq!((empty.f, empty.commit, empty.weak), (0, 0, 1));
}

#[test]
fn commit_quorums_always_intersect_in_an_honest_node() {
    for n in 1..200 {
        let q = Quorums::new(n);
        assert!(2 * q.commit >= n + q.f + 1, "N = {}", n);
        assert!(q.commit + q.f <= n);
    }
}
