//! Parallel table operators, one worker task per partition.
//!
//! Every operator here writes its result into a fresh `IN_MEMORY` table
//! rather than mutating its source, handing back a new table object per
//! transformation.

use std::sync::Arc;

use crate::context::EngineContext;
use crate::errors::EngineResult;
use crate::hash::partition_for_key;
use crate::ids::Operand;
use crate::scheduler::{BinaryTask, TaskInfo, UnaryTask};
use crate::table::Table;
use crate::value::Value;

pub type MapFn = Arc<dyn Fn(Value, Value) -> (Value, Value) + Send + Sync>;
pub type MapValuesFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub type MapPartitionsFn = Arc<dyn Fn(Vec<(Value, Value)>) -> Value + Send + Sync>;
pub type ReduceFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;
pub type FilterFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type JoinFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

fn new_result_table(ctx: &EngineContext, partitions: u64) -> EngineResult<Table> {
    ctx.table(uuid::Uuid::new_v4().to_string(), ctx.job_id().to_string(), partitions, false)
}

/// Addressing context shared by every partition task a single operator
/// call fans out, named after the table the operator writes into.
fn task_info(ctx: &EngineContext, dest: &Table) -> TaskInfo {
    TaskInfo {
        job_id: ctx.job_id().to_string(),
        function_id: dest.id().meta_key(),
    }
}

/// Re-partitions whichever side of a binary operator is smaller so both
/// tables end up with the same partition count, then retries `op`. Used by
/// `join`, `union`, and `subtract_by_key`, all of which require matching
/// keys to land in the same partition index on both sides.
fn align_and_retry<R>(
    ctx: &EngineContext,
    left: &Table,
    right: &Table,
    op: impl Fn(&EngineContext, &Table, &Table) -> EngineResult<R>,
) -> EngineResult<R> {
    if right.count()? > left.count()? {
        log::debug!(
            "repartitioning left side of binary op from {} to {} partitions",
            left.partitions(),
            right.partitions()
        );
        let repartitioned = left.save_as(
            uuid::Uuid::new_v4().to_string(),
            ctx.job_id().to_string(),
            Some(right.partitions()),
            true,
        )?;
        op(ctx, &repartitioned, right)
    } else {
        let repartitioned = right.save_as(
            uuid::Uuid::new_v4().to_string(),
            ctx.job_id().to_string(),
            Some(left.partitions()),
            true,
        )?;
        op(ctx, left, &repartitioned)
    }
}

/// Applies `mapper` to every entry, reshuffling by the new key's hash. The
/// only operator whose source partition may write into every destination
/// partition rather than just its own index.
pub fn map(ctx: &EngineContext, source: &Table, mapper: MapFn) -> EngineResult<Table> {
    let dest = new_result_table(ctx, source.partitions())?;
    let dest_partitions = dest.partitions();
    let info = task_info(ctx, &dest);
    ctx.pool().map_partitions(source.partitions(), {
        let source = source.clone();
        let dest = dest.clone();
        move |p| {
            let task = UnaryTask {
                info: info.clone(),
                source: Operand::new(source.id().clone(), p),
            };
            log::trace!("running {task:?}");
            let src_store = source.store_for_partition(p)?;
            let mut buckets: Vec<Vec<(Vec<u8>, Vec<u8>)>> =
                (0..dest_partitions).map(|_| Vec::new()).collect();
            for (k_bytes, v_bytes) in src_store.cursor()? {
                let k = Value::decode(&k_bytes)?;
                let v = Value::decode(&v_bytes)?;
                let (k1, v1) = mapper(k, v);
                let k1_bytes = k1.encode()?;
                let v1_bytes = v1.encode()?;
                let p1 = partition_for_key(&k1_bytes, dest_partitions)? as usize;
                buckets[p1].push((k1_bytes, v1_bytes));
            }
            for (p1, batch) in buckets.into_iter().enumerate() {
                if batch.is_empty() {
                    continue;
                }
                dest.store_for_partition(p1 as u64)?.put_all(batch)?;
            }
            Ok(())
        }
    })?;
    Ok(dest)
}

/// Applies `mapper` to every value, keeping keys and partition
/// assignment unchanged.
pub fn map_values(ctx: &EngineContext, source: &Table, mapper: MapValuesFn) -> EngineResult<Table> {
    let dest = new_result_table(ctx, source.partitions())?;
    let info = task_info(ctx, &dest);
    ctx.pool().map_partitions(source.partitions(), {
        let source = source.clone();
        let dest = dest.clone();
        move |p| {
            let task = UnaryTask {
                info: info.clone(),
                source: Operand::new(source.id().clone(), p),
            };
            log::trace!("running {task:?}");
            let src_store = source.store_for_partition(p)?;
            let dst_store = dest.store_for_partition(p)?;
            let mut batch = Vec::new();
            for (k_bytes, v_bytes) in src_store.cursor()? {
                let v1 = mapper(Value::decode(&v_bytes)?).encode()?;
                batch.push((k_bytes, v1));
            }
            if !batch.is_empty() {
                dst_store.put_all(batch)?;
            }
            Ok(())
        }
    })?;
    Ok(dest)
}

/// Runs `mapper` once per partition over the whole materialized partition,
/// writing its single scalar return under the partition's last-seen
/// encoded key (nothing is written for an empty partition).
pub fn map_partitions(
    ctx: &EngineContext,
    source: &Table,
    mapper: MapPartitionsFn,
) -> EngineResult<Table> {
    let dest = new_result_table(ctx, source.partitions())?;
    let info = task_info(ctx, &dest);
    ctx.pool().map_partitions(source.partitions(), {
        let source = source.clone();
        let dest = dest.clone();
        move |p| {
            let task = UnaryTask {
                info: info.clone(),
                source: Operand::new(source.id().clone(), p),
            };
            log::trace!("running {task:?}");
            let src_store = source.store_for_partition(p)?;
            let mut entries = Vec::new();
            let mut last_key = None;
            for (k_bytes, v_bytes) in src_store.cursor()? {
                let k = Value::decode(&k_bytes)?;
                let v = Value::decode(&v_bytes)?;
                last_key = Some(k_bytes);
                entries.push((k, v));
            }
            if let Some(k_bytes) = last_key {
                let v = mapper(entries);
                dest.store_for_partition(p)?.put(&k_bytes, &v.encode()?)?;
            }
            Ok(())
        }
    })?;
    Ok(dest)
}

/// Folds `reducer` across every value in the table. Returns `None` if the
/// table is empty.
pub fn reduce(ctx: &EngineContext, source: &Table, reducer: ReduceFn) -> EngineResult<Option<Value>> {
    let info = TaskInfo {
        job_id: ctx.job_id().to_string(),
        function_id: source.id().meta_key(),
    };
    let partials = ctx.pool().map_partitions(source.partitions(), {
        let source = source.clone();
        let reducer = Arc::clone(&reducer);
        move |p| {
            let task = UnaryTask {
                info: info.clone(),
                source: Operand::new(source.id().clone(), p),
            };
            log::trace!("running {task:?}");
            let store = source.store_for_partition(p)?;
            let mut acc: Option<Value> = None;
            for (_, v_bytes) in store.cursor()? {
                let v = Value::decode(&v_bytes)?;
                acc = Some(match acc {
                    None => v,
                    Some(prev) => reducer(prev, v),
                });
            }
            Ok(acc)
        }
    })?;
    let mut partials = partials.into_iter().flatten();
    let Some(first) = partials.next() else {
        return Ok(None);
    };
    Ok(Some(partials.fold(first, |acc, v| reducer(acc, v))))
}

/// Keeps only entries whose key satisfies `predicate`.
pub fn filter(ctx: &EngineContext, source: &Table, predicate: FilterFn) -> EngineResult<Table> {
    let dest = new_result_table(ctx, source.partitions())?;
    let info = task_info(ctx, &dest);
    ctx.pool().map_partitions(source.partitions(), {
        let source = source.clone();
        let dest = dest.clone();
        move |p| {
            let task = UnaryTask {
                info: info.clone(),
                source: Operand::new(source.id().clone(), p),
            };
            log::trace!("running {task:?}");
            let src_store = source.store_for_partition(p)?;
            let dst_store = dest.store_for_partition(p)?;
            let mut batch = Vec::new();
            for (k_bytes, v_bytes) in src_store.cursor()? {
                let k = Value::decode(&k_bytes)?;
                if predicate(&k) {
                    batch.push((k_bytes, v_bytes));
                }
            }
            if !batch.is_empty() {
                dst_store.put_all(batch)?;
            }
            Ok(())
        }
    })?;
    Ok(dest)
}

/// Collapses every partition's entries into a single `(lastKey, entries)`
/// pair, one per source partition; empty partitions contribute nothing.
pub fn glom(ctx: &EngineContext, source: &Table) -> EngineResult<Table> {
    let dest = new_result_table(ctx, source.partitions())?;
    let info = task_info(ctx, &dest);
    ctx.pool().map_partitions(source.partitions(), {
        let source = source.clone();
        let dest = dest.clone();
        move |p| {
            let task = UnaryTask {
                info: info.clone(),
                source: Operand::new(source.id().clone(), p),
            };
            log::trace!("running {task:?}");
            let src_store = source.store_for_partition(p)?;
            let mut entries = Vec::new();
            let mut last_key = None;
            for (k_bytes, v_bytes) in src_store.cursor()? {
                let k = Value::decode(&k_bytes)?;
                let v = Value::decode(&v_bytes)?;
                last_key = Some(k_bytes);
                entries.push(Value::List(vec![k, v]));
            }
            if let Some(k_bytes) = last_key {
                let packed = Value::List(entries).encode()?;
                dest.store_for_partition(p)?.put(&k_bytes, &packed)?;
            }
            Ok(())
        }
    })?;
    Ok(dest)
}

/// A Bernoulli sample with the given `fraction`, drawn with a seeded PRNG
/// so results are reproducible across runs when `seed` is set.
pub fn sample(ctx: &EngineContext, source: &Table, fraction: f64, seed: Option<u64>) -> EngineResult<Table> {
    use rand::{Rng, SeedableRng};
    use rand_xorshift::XorShiftRng;

    let dest = new_result_table(ctx, source.partitions())?;
    let info = task_info(ctx, &dest);
    ctx.pool().map_partitions(source.partitions(), {
        let source = source.clone();
        let dest = dest.clone();
        move |p| {
            let task = UnaryTask {
                info: info.clone(),
                source: Operand::new(source.id().clone(), p),
            };
            log::trace!("running {task:?}");
            let src_store = source.store_for_partition(p)?;
            let dst_store = dest.store_for_partition(p)?;
            // Partition index folded into the seed so every partition's
            // draws are independent but still fully determined by `seed`.
            let mut rng = match seed {
                Some(s) => XorShiftRng::seed_from_u64(s.wrapping_add(p)),
                None => XorShiftRng::seed_from_u64(rand::rng().random::<u64>()),
            };
            let mut batch = Vec::new();
            for (k_bytes, v_bytes) in src_store.cursor()? {
                if rng.random::<f64>() < fraction {
                    batch.push((k_bytes, v_bytes));
                }
            }
            if !batch.is_empty() {
                dst_store.put_all(batch)?;
            }
            Ok(())
        }
    })?;
    Ok(dest)
}

/// Inner join: keeps keys present on both sides, combining values with
/// `joiner`. Repartitions the smaller side to match the larger's
/// partition count when they differ, then retries.
pub fn join(ctx: &EngineContext, left: &Table, right: &Table, joiner: JoinFn) -> EngineResult<Table> {
    if left.partitions() != right.partitions() {
        return align_and_retry(ctx, left, right, |ctx, left, right| join(ctx, left, right, Arc::clone(&joiner)));
    }
    let dest = new_result_table(ctx, left.partitions())?;
    let info = task_info(ctx, &dest);
    ctx.pool().map_partitions(left.partitions(), {
        let left = left.clone();
        let right = right.clone();
        let dest = dest.clone();
        move |p| {
            let task = BinaryTask {
                info: info.clone(),
                left: Operand::new(left.id().clone(), p),
                right: Operand::new(right.id().clone(), p),
            };
            log::trace!("running {task:?}");
            let left_store = left.store_for_partition(p)?;
            let right_store = right.store_for_partition(p)?;
            let dst_store = dest.store_for_partition(p)?;
            let mut batch = Vec::new();
            for (k_bytes, left_bytes) in left_store.cursor()? {
                let Some(right_bytes) = right_store.get(&k_bytes)? else {
                    continue;
                };
                let v1 = Value::decode(&left_bytes)?;
                let v2 = Value::decode(&right_bytes)?;
                let joined = joiner(v1, v2).encode()?;
                batch.push((k_bytes, joined));
            }
            if !batch.is_empty() {
                dst_store.put_all(batch)?;
            }
            Ok(())
        }
    })?;
    Ok(dest)
}

/// Union of both tables; keys present on both sides are combined with
/// `conflict` (left-biased conflict functions are the common case).
pub fn union(ctx: &EngineContext, left: &Table, right: &Table, conflict: JoinFn) -> EngineResult<Table> {
    if left.partitions() != right.partitions() {
        return align_and_retry(ctx, left, right, |ctx, left, right| union(ctx, left, right, Arc::clone(&conflict)));
    }
    let dest = new_result_table(ctx, left.partitions())?;
    let info = task_info(ctx, &dest);
    ctx.pool().map_partitions(left.partitions(), {
        let left = left.clone();
        let right = right.clone();
        let dest = dest.clone();
        move |p| {
            let task = BinaryTask {
                info: info.clone(),
                left: Operand::new(left.id().clone(), p),
                right: Operand::new(right.id().clone(), p),
            };
            log::trace!("running {task:?}");
            let left_store = left.store_for_partition(p)?;
            let right_store = right.store_for_partition(p)?;
            let dst_store = dest.store_for_partition(p)?;
            let mut batch = Vec::new();
            for (k_bytes, left_bytes) in left_store.cursor()? {
                let merged = match right_store.get(&k_bytes)? {
                    None => left_bytes,
                    Some(right_bytes) => {
                        let v1 = Value::decode(&left_bytes)?;
                        let v2 = Value::decode(&right_bytes)?;
                        conflict(v1, v2).encode()?
                    }
                };
                batch.push((k_bytes, merged));
            }
            for (k_bytes, right_bytes) in right_store.cursor()? {
                if left_store.get(&k_bytes)?.is_none() {
                    batch.push((k_bytes, right_bytes));
                }
            }
            if !batch.is_empty() {
                dst_store.put_all(batch)?;
            }
            Ok(())
        }
    })?;
    Ok(dest)
}

/// Entries of `left` whose key is absent from `right`. The repartition-retry
/// path always recurses into `subtract_by_key` itself, never into `union`.
pub fn subtract_by_key(ctx: &EngineContext, left: &Table, right: &Table) -> EngineResult<Table> {
    if left.partitions() != right.partitions() {
        return align_and_retry(ctx, left, right, subtract_by_key);
    }
    let dest = new_result_table(ctx, left.partitions())?;
    let info = task_info(ctx, &dest);
    ctx.pool().map_partitions(left.partitions(), {
        let left = left.clone();
        let right = right.clone();
        let dest = dest.clone();
        move |p| {
            let task = BinaryTask {
                info: info.clone(),
                left: Operand::new(left.id().clone(), p),
                right: Operand::new(right.id().clone(), p),
            };
            log::trace!("running {task:?}");
            let left_store = left.store_for_partition(p)?;
            let right_store = right.store_for_partition(p)?;
            let dst_store = dest.store_for_partition(p)?;
            let mut batch = Vec::new();
            for (k_bytes, v_bytes) in left_store.cursor()? {
                if right_store.get(&k_bytes)?.is_none() {
                    batch.push((k_bytes, v_bytes));
                }
            }
            if !batch.is_empty() {
                dst_store.put_all(batch)?;
            }
            Ok(())
        }
    })?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn context() -> (tempfile::TempDir, Arc<EngineContext>) {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.data_dir = dir.path().to_path_buf();
        options.threads = 2;
        (dir, EngineContext::new(&options).unwrap())
    }

    fn seed_table(ctx: &EngineContext, name: &str, partitions: u64, entries: &[(i64, i64)]) -> Table {
        let table = ctx.table(name, "ns", partitions, true).unwrap();
        table
            .put_all(
                entries
                    .iter()
                    .map(|(k, v)| (Value::Int(*k), Value::Int(*v))),
                true,
            )
            .unwrap();
        table
    }

    #[test]
    fn map_values_doubles_every_value() {
        let (_dir, ctx) = context();
        let source = seed_table(&ctx, "t1", 3, &[(1, 10), (2, 20), (3, 30)]);
        let mapper: MapValuesFn = Arc::new(|v| match v {
            Value::Int(n) => Value::Int(n * 2),
            other => other,
        });
        let result = map_values(&ctx, &source, mapper).unwrap();
        let mut collected: Vec<(i64, i64)> = result
            .collect(true)
            .unwrap()
            .map(|r| {
                let (k, v) = r.unwrap();
                match (k, v) {
                    (Value::Int(k), Value::Int(v)) => (k, v),
                    _ => unreachable!(),
                }
            })
            .collect();
        collected.sort();
        assert_eq!(collected, vec![(1, 20), (2, 40), (3, 60)]);
    }

    #[test]
    fn map_reshuffles_by_new_key() {
        let (_dir, ctx) = context();
        let source = seed_table(&ctx, "t1", 4, &(0..20).map(|i| (i, i)).collect::<Vec<_>>());
        let mapper: MapFn = Arc::new(|k, v| match (k, v) {
            (Value::Int(k), Value::Int(v)) => (Value::Int(k), Value::Int(v + 1)),
            other => other,
        });
        let result = map(&ctx, &source, mapper).unwrap();
        assert_eq!(result.count().unwrap(), 20);
    }

    #[test]
    fn reduce_sums_all_values() {
        let (_dir, ctx) = context();
        let source = seed_table(&ctx, "t1", 3, &[(1, 10), (2, 20), (3, 30)]);
        let reducer: ReduceFn = Arc::new(|a, b| match (a, b) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
            _ => unreachable!(),
        });
        let result = reduce(&ctx, &source, reducer).unwrap();
        assert_eq!(result, Some(Value::Int(60)));
    }

    #[test]
    fn reduce_over_empty_table_is_none() {
        let (_dir, ctx) = context();
        let source = seed_table(&ctx, "t1", 3, &[]);
        let reducer: ReduceFn = Arc::new(|a, _| a);
        assert_eq!(reduce(&ctx, &source, reducer).unwrap(), None);
    }

    #[test]
    fn filter_keeps_only_matching_keys() {
        let (_dir, ctx) = context();
        let source = seed_table(&ctx, "t1", 3, &(0..10).map(|i| (i, i)).collect::<Vec<_>>());
        let predicate: FilterFn = Arc::new(|k| matches!(k, Value::Int(n) if n % 2 == 0));
        let result = filter(&ctx, &source, predicate).unwrap();
        assert_eq!(result.count().unwrap(), 5);
    }

    #[test]
    fn join_keeps_only_matching_keys_on_both_sides() {
        let (_dir, ctx) = context();
        let left = seed_table(&ctx, "left", 2, &[(1, 10), (2, 20), (3, 30)]);
        let right = seed_table(&ctx, "right", 2, &[(2, 200), (3, 300), (4, 400)]);
        let joiner: JoinFn = Arc::new(|a, b| match (a, b) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
            _ => unreachable!(),
        });
        let result = join(&ctx, &left, &right, joiner).unwrap();
        assert_eq!(result.count().unwrap(), 2);
    }

    #[test]
    fn join_realigns_mismatched_partition_counts() {
        let (_dir, ctx) = context();
        let left = seed_table(&ctx, "left", 2, &[(1, 10), (2, 20)]);
        let right = seed_table(&ctx, "right", 5, &[(1, 100), (2, 200)]);
        let joiner: JoinFn = Arc::new(|a, b| match (a, b) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
            _ => unreachable!(),
        });
        let result = join(&ctx, &left, &right, joiner).unwrap();
        assert_eq!(result.count().unwrap(), 2);
    }

    #[test]
    fn subtract_by_key_removes_common_keys() {
        let (_dir, ctx) = context();
        let left = seed_table(&ctx, "left", 2, &[(1, 10), (2, 20), (3, 30)]);
        let right = seed_table(&ctx, "right", 2, &[(2, 0), (3, 0)]);
        let result = subtract_by_key(&ctx, &left, &right).unwrap();
        let remaining: Vec<(Value, Value)> = result.collect(true).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(remaining, vec![(Value::Int(1), Value::Int(10))]);
    }

    #[test]
    fn subtract_by_key_realigns_mismatched_partitions_via_recursion() {
        let (_dir, ctx) = context();
        let left = seed_table(&ctx, "left", 2, &[(1, 10), (2, 20)]);
        let right = seed_table(&ctx, "right", 5, &[(2, 0)]);
        let result = subtract_by_key(&ctx, &left, &right).unwrap();
        assert_eq!(result.count().unwrap(), 1);
    }

    #[test]
    fn union_combines_with_conflict_function() {
        let (_dir, ctx) = context();
        let left = seed_table(&ctx, "left", 2, &[(1, 10), (2, 20)]);
        let right = seed_table(&ctx, "right", 2, &[(2, 200), (3, 300)]);
        let conflict: JoinFn = Arc::new(|a, _b| a);
        let result = union(&ctx, &left, &right, conflict).unwrap();
        assert_eq!(result.count().unwrap(), 3);
    }

    #[test]
    fn sample_with_fixed_seed_is_deterministic() {
        let (_dir, ctx) = context();
        let source = seed_table(&ctx, "t1", 3, &(0..100).map(|i| (i, i)).collect::<Vec<_>>());
        let a = sample(&ctx, &source, 0.3, Some(42)).unwrap();
        let b = sample(&ctx, &source, 0.3, Some(42)).unwrap();
        assert_eq!(a.count().unwrap(), b.count().unwrap());
    }

    #[test]
    fn glom_packs_each_partition_into_one_entry() {
        let (_dir, ctx) = context();
        let source = seed_table(&ctx, "t1", 2, &[(1, 10), (2, 20), (3, 30), (4, 40)]);
        let result = glom(&ctx, &source).unwrap();
        // At most one packed entry per non-empty partition.
        assert!(result.count().unwrap() <= 2);
    }

    #[test]
    fn map_partitions_writes_nothing_for_empty_partitions() {
        let (_dir, ctx) = context();
        let source = seed_table(&ctx, "t1", 4, &[(1, 10)]);
        let counter: MapPartitionsFn = Arc::new(|entries| Value::Int(entries.len() as i64));
        let result = map_partitions(&ctx, &source, counter).unwrap();
        // Only the one non-empty partition produces an entry.
        assert_eq!(result.count().unwrap(), 1);
    }

    #[test]
    fn map_partitions_stores_result_under_last_seen_key() {
        let (_dir, ctx) = context();
        let source = seed_table(&ctx, "t1", 1, &[(1, 10), (2, 20), (3, 30)]);
        let sum_values: MapPartitionsFn = Arc::new(|entries| {
            let total: i64 = entries
                .iter()
                .map(|(_, v)| match v {
                    Value::Int(n) => *n,
                    _ => unreachable!(),
                })
                .sum();
            Value::Int(total)
        });
        let result = map_partitions(&ctx, &source, sum_values).unwrap();
        let entries: Vec<(Value, Value)> = result.collect(true).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(entries, vec![(Value::Int(3), Value::Int(60))]);
    }
}
