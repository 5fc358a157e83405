// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::thread::scope;

/// Create and execute a worker pool whose results are handed to the postprocessor
/// in the order given by `Orderable::index`, regardless of completion order.
///
/// # Arguments
/// * `preprocessor` - Closure that generates the work items. Item indices have to be
///   contiguous and start at 0.
/// * `workers` - Closures that execute the work.
/// * `postprocessor` - Closure that consumes the results in index order.
pub(crate) fn worker_pool<Pre, Workers, W, Post, U, T>(
    preprocessor: Pre,
    workers: Workers,
    mut postprocessor: Post,
    in_capacity: usize,
    out_capacity: usize,
) -> Result<()>
where
    Pre: FnOnce(Sender<U>) -> Result<()>,
    Pre: Send,
    Workers: Iterator<Item = W>,
    W: FnOnce(Receiver<U>, Sender<T>) -> Result<()>,
    W: Send,
    Post: FnMut(T) -> Result<()>,
    Post: Send,
    T: Send + Orderable,
    U: Send,
{
    scope(|scope| -> Result<()> {
        let (in_sender, in_receiver) = bounded(in_capacity);
        let (out_sender, out_receiver) = bounded(out_capacity);

        let preprocessor = scope.spawn(move |_| preprocessor(in_sender));

        let workers: Vec<_> = workers
            .map(|worker: W| {
                let in_receiver = in_receiver.clone();
                let out_sender = out_sender.clone();
                scope.spawn(move |_| worker(in_receiver, out_sender))
            })
            .collect();
        // channels close once the last clone is gone
        drop(in_receiver);
        drop(out_sender);

        let postprocessor = scope.spawn(move |_| -> Result<()> {
            let mut items = OrderedContainer::new();
            let mut next_index = 0;

            for item in out_receiver {
                items.insert(item.index(), item);

                // Find continuous prefix, postprocess in order.
                for item in items.remove_continuous_prefix(&mut next_index) {
                    postprocessor(item)?;
                }
            }

            if !items.is_empty() {
                return Err(anyhow!(
                    "worker pool finished with {} unprocessed items",
                    items.len()
                ));
            }

            Ok(())
        });

        let mut errors = Vec::new();

        let joined = |ret: std::thread::Result<Result<()>>| {
            ret.unwrap_or_else(|_| Err(anyhow!("worker thread panicked")))
        };

        let ret = joined(postprocessor.join());
        if ret.is_err() {
            errors.push(ret);
        }

        for worker in workers {
            let ret = joined(worker.join());
            if ret.is_err() {
                errors.push(ret);
            }
        }

        let ret = joined(preprocessor.join());
        if ret.is_err() {
            errors.push(ret);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            errors.swap_remove(0)
        }
    })
    .map_err(|_| anyhow!("worker thread panicked"))??;

    Ok(())
}

pub(crate) trait Orderable {
    fn index(&self) -> usize;
}

struct OrderedContainer<T> {
    inner: BTreeMap<usize, T>,
}

impl<T> OrderedContainer<T>
where
    T: Orderable,
{
    fn new() -> Self {
        OrderedContainer {
            inner: BTreeMap::new(),
        }
    }

    fn insert(&mut self, key: usize, value: T) {
        self.inner.insert(key, value);
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn remove_continuous_prefix(&mut self, next_index: &mut usize) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.inner.remove(next_index) {
            items.push(item);
            *next_index += 1;
        }
        items
    }
}
