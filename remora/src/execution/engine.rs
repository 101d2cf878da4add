//! Functionality which handles the execution of a compiled program.

use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use hashbrown::HashMap;
use rayon::prelude::*;
use regex::Regex;

use crate::{
    datavalues::{StorageValue, Tuple},
    dictionary::{record_table::RecordTable, symbol_table::SymbolTable},
    error::Error,
    functors::{FunctorResolver, LibraryResolver, ResolvedFunctor},
    ram::{
        aggregates::{AggregateAccumulator, AggregateFunction},
        condition::{ComparisonOperator, Condition},
        expression::{BinaryOperator, Expression, UnaryOperator},
        operation::Operation,
        program::Program,
        relation::RelationId,
        statement::Statement,
    },
    storage::store::RelationStore,
};

use super::{
    context::EvaluationContext, cursor_pool::CursorPools,
    execution_parameters::ExecutionParameters, profiling::Profile,
};

/// The implicit identity-order index every relation maintains.
const PRIMARY_INDEX: usize = 0;

/// Values and undefined-flags produced by one subroutine execution.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubroutineResult {
    /// Return values in the order they were produced; undefined slots
    /// hold zero.
    pub values: Vec<StorageValue>,
    /// Parallel flags marking return slots that carry no defined value.
    pub undefined: Vec<bool>,
}

/// Functor resolution state: the injected capability plus the cache of
/// symbols resolved so far. The cache is dropped before the resolver,
/// which keeps library-backed functors valid for as long as they exist.
#[derive(Default)]
struct FunctorCache {
    resolved: HashMap<String, ResolvedFunctor>,
    resolver: Option<Box<dyn FunctorResolver>>,
}

impl Debug for FunctorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctorCache")
            .field("resolved", &self.resolved.keys().collect::<Vec<_>>())
            .field("resolver", &self.resolver)
            .finish()
    }
}

/// Object which drives the evaluation of a compiled relational-algebra
/// program.
///
/// The engine owns all mutable evaluation state — the relation store, the
/// counters, and the profiling data — with a lifecycle of exactly one
/// program execution: create the engine, run it, read the results,
/// discard it.
#[derive(Debug)]
pub struct ExecutionEngine {
    program: Program,
    store: RelationStore,

    symbols: Arc<SymbolTable>,
    records: Arc<RecordTable>,

    worker_pool: rayon::ThreadPool,
    functors: Mutex<FunctorCache>,
    match_patterns: Mutex<HashMap<String, Option<Regex>>>,

    /// Counter behind the autoincrement operator.
    counter: AtomicI64,
    /// Current fixpoint iteration, reset at every loop boundary.
    iteration: AtomicUsize,

    profile: Profile,
}

impl ExecutionEngine {
    /// Initialize an [ExecutionEngine].
    ///
    /// The symbol and record tables are owned by the embedder; the engine
    /// reads and interns through them during evaluation.
    pub fn initialize(
        program: Program,
        mut parameters: ExecutionParameters,
        symbols: Arc<SymbolTable>,
        records: Arc<RecordTable>,
    ) -> Result<Self, Error> {
        let store = RelationStore::new(program.relations());
        let profile = Profile::new(parameters.profiling, program.relations().len());

        let worker_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parameters.num_threads)
            .build()?;

        let resolver = parameters.functor_resolver.take().or_else(|| {
            parameters.functor_library.take().map(|path| {
                let resolver: Box<dyn FunctorResolver> = Box::new(LibraryResolver::new(path));
                resolver
            })
        });

        log::debug!(
            "engine initialized: {} relations, {} worker threads",
            store.relation_count(),
            worker_pool.current_num_threads()
        );

        Ok(Self {
            program,
            store,
            symbols,
            records,
            worker_pool,
            functors: Mutex::new(FunctorCache {
                resolved: HashMap::new(),
                resolver,
            }),
            match_patterns: Mutex::new(HashMap::new()),
            counter: AtomicI64::new(0),
            iteration: AtomicUsize::new(0),
            profile,
        })
    }

    /// Execute the main program. On return, all relations hold their final
    /// fixpoint contents.
    pub fn execute_main(&self) -> Result<(), Error> {
        log::info!("executing main program");

        let mut context = EvaluationContext::new();
        let mut pools = CursorPools::default();
        self.execute_statement(self.program.main(), &mut context, &mut pools)?;

        log::info!("main program finished");
        Ok(())
    }

    /// Execute the named subroutine with the given arguments.
    ///
    /// # Panics
    /// Panics if no such subroutine exists; subroutine names are fixed at
    /// compilation time, so an unknown name is a defect in the caller.
    pub fn execute_subroutine(
        &self,
        name: &str,
        arguments: &[StorageValue],
    ) -> Result<SubroutineResult, Error> {
        let body = self
            .program
            .subroutine(name)
            .unwrap_or_else(|| panic!("No subroutine named \"{name}\" exists."));

        log::debug!("executing subroutine \"{name}\"");

        let mut context = EvaluationContext::with_arguments(arguments.to_vec());
        let mut pools = CursorPools::default();
        self.execute_statement(body, &mut context, &mut pools)?;

        let (values, undefined) = context.take_returns();
        Ok(SubroutineResult { values, undefined })
    }

    /// The executed program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The relation store, for inspecting results after execution.
    pub fn store(&self) -> &RelationStore {
        &self.store
    }

    /// The profiling counters gathered during this execution.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Execute a statement; returns whether the enclosing loop should
    /// continue.
    fn execute_statement(
        &self,
        statement: &Statement,
        context: &mut EvaluationContext,
        pools: &mut CursorPools,
    ) -> Result<bool, Error> {
        match statement {
            Statement::Sequence(children) => {
                for child in children {
                    if !self.execute_statement(child, context, pools)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Statement::Loop(body) => {
                self.iteration.store(0, Ordering::Relaxed);
                while self.execute_statement(body, context, pools)? {
                    self.iteration.fetch_add(1, Ordering::Relaxed);
                }
                log::debug!(
                    "fixpoint reached after {} iterations",
                    self.iteration.load(Ordering::Relaxed)
                );
                self.iteration.store(0, Ordering::Relaxed);
                Ok(true)
            }
            Statement::Exit(condition) => Ok(!self.evaluate_condition(condition, context)?),
            Statement::Query(operation) => {
                self.execute_operation(operation, context, pools)?;
                Ok(true)
            }
            Statement::Clear(relation) => {
                self.store.clear(*relation);
                Ok(true)
            }
            Statement::Swap(a, b) => {
                self.store.swap(*a, *b);
                Ok(true)
            }
            Statement::Merge { source, target } => {
                let added = self.store.merge(*source, *target);
                log::trace!("merged {added} new tuples from {source} into {target}");
                Ok(true)
            }
        }
    }

    /// Execute one operation node against the current bindings.
    fn execute_operation(
        &self,
        operation: &Operation,
        context: &mut EvaluationContext,
        pools: &mut CursorPools,
    ) -> Result<(), Error> {
        match operation {
            Operation::Scan {
                relation,
                tuple_id,
                slot,
                nested,
            } => {
                *pools.scan.slot(*slot) = self
                    .store
                    .relation(*relation)
                    .index(PRIMARY_INDEX)
                    .full_cursor();

                loop {
                    let next = {
                        let guard = self.store.relation(*relation);
                        pools.scan.slot(*slot).next(guard.index(PRIMARY_INDEX))
                    };
                    match next {
                        Some(tuple) => {
                            context.set_tuple(*tuple_id, tuple);
                            self.execute_operation(nested, context, pools)?;
                        }
                        None => break,
                    }
                }
                Ok(())
            }
            Operation::ParallelScan {
                relation,
                tuple_id,
                nested,
            } => {
                let tuples = self.store.contents(*relation);
                self.run_parallel_scan(tuples, *tuple_id, nested, context)
            }
            Operation::IndexScan {
                relation,
                index,
                lower,
                upper,
                tuple_id,
                slot,
                nested,
            } => {
                let lower = self.evaluate_pattern(lower, context)?;
                let upper = self.evaluate_pattern(upper, context)?;
                *pools.index_scan.slot(*slot) = self
                    .store
                    .relation(*relation)
                    .index(*index)
                    .range_cursor(&lower, &upper);

                loop {
                    let next = {
                        let guard = self.store.relation(*relation);
                        pools.index_scan.slot(*slot).next(guard.index(*index))
                    };
                    match next {
                        Some(tuple) => {
                            context.set_tuple(*tuple_id, tuple);
                            self.execute_operation(nested, context, pools)?;
                        }
                        None => break,
                    }
                }
                Ok(())
            }
            Operation::ParallelIndexScan {
                relation,
                index,
                lower,
                upper,
                tuple_id,
                nested,
            } => {
                let tuples = self.materialize_range(*relation, *index, lower, upper, context)?;
                self.run_parallel_scan(tuples, *tuple_id, nested, context)
            }
            Operation::Choice {
                relation,
                filter,
                tuple_id,
                slot,
                nested,
            } => {
                *pools.choice.slot(*slot) = self
                    .store
                    .relation(*relation)
                    .index(PRIMARY_INDEX)
                    .full_cursor();

                loop {
                    let next = {
                        let guard = self.store.relation(*relation);
                        pools.choice.slot(*slot).next(guard.index(PRIMARY_INDEX))
                    };
                    match next {
                        Some(tuple) => {
                            context.set_tuple(*tuple_id, tuple);
                            if self.evaluate_condition(filter, context)? {
                                self.execute_operation(nested, context, pools)?;
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Ok(())
            }
            Operation::ParallelChoice {
                relation,
                filter,
                tuple_id,
                nested,
            } => {
                let tuples = self.store.contents(*relation);
                if let Some(tuple) =
                    self.run_parallel_choice(tuples, filter, *tuple_id, context)?
                {
                    context.set_tuple(*tuple_id, tuple);
                    self.execute_operation(nested, context, pools)?;
                }
                Ok(())
            }
            Operation::IndexChoice {
                relation,
                index,
                lower,
                upper,
                filter,
                tuple_id,
                slot,
                nested,
            } => {
                let lower = self.evaluate_pattern(lower, context)?;
                let upper = self.evaluate_pattern(upper, context)?;
                *pools.index_choice.slot(*slot) = self
                    .store
                    .relation(*relation)
                    .index(*index)
                    .range_cursor(&lower, &upper);

                loop {
                    let next = {
                        let guard = self.store.relation(*relation);
                        pools.index_choice.slot(*slot).next(guard.index(*index))
                    };
                    match next {
                        Some(tuple) => {
                            context.set_tuple(*tuple_id, tuple);
                            if self.evaluate_condition(filter, context)? {
                                self.execute_operation(nested, context, pools)?;
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Ok(())
            }
            Operation::ParallelIndexChoice {
                relation,
                index,
                lower,
                upper,
                filter,
                tuple_id,
                nested,
            } => {
                let tuples = self.materialize_range(*relation, *index, lower, upper, context)?;
                if let Some(tuple) =
                    self.run_parallel_choice(tuples, filter, *tuple_id, context)?
                {
                    context.set_tuple(*tuple_id, tuple);
                    self.execute_operation(nested, context, pools)?;
                }
                Ok(())
            }
            Operation::Aggregate {
                relation,
                function,
                expression,
                filter,
                tuple_id,
                nested,
            } => {
                let tuples = self.store.contents(*relation);
                let accumulator = self.fold_aggregate(
                    &tuples,
                    *function,
                    expression.as_ref(),
                    filter,
                    *tuple_id,
                    context,
                )?;
                self.finish_aggregate(accumulator, *tuple_id, nested, context, pools)
            }
            Operation::ParallelAggregate {
                relation,
                function,
                expression,
                filter,
                tuple_id,
                nested,
            } => {
                let tuples = self.store.contents(*relation);
                let accumulator = self.fold_parallel_aggregate(
                    tuples,
                    *function,
                    expression.as_ref(),
                    filter,
                    *tuple_id,
                    context,
                )?;
                self.finish_aggregate(accumulator, *tuple_id, nested, context, pools)
            }
            Operation::IndexAggregate {
                relation,
                index,
                lower,
                upper,
                function,
                expression,
                filter,
                tuple_id,
                nested,
            } => {
                let tuples = self.materialize_range(*relation, *index, lower, upper, context)?;
                let accumulator = self.fold_aggregate(
                    &tuples,
                    *function,
                    expression.as_ref(),
                    filter,
                    *tuple_id,
                    context,
                )?;
                self.finish_aggregate(accumulator, *tuple_id, nested, context, pools)
            }
            Operation::ParallelIndexAggregate {
                relation,
                index,
                lower,
                upper,
                function,
                expression,
                filter,
                tuple_id,
                nested,
            } => {
                let tuples = self.materialize_range(*relation, *index, lower, upper, context)?;
                let accumulator = self.fold_parallel_aggregate(
                    tuples,
                    *function,
                    expression.as_ref(),
                    filter,
                    *tuple_id,
                    context,
                )?;
                self.finish_aggregate(accumulator, *tuple_id, nested, context, pools)
            }
            Operation::Filter { condition, nested } => {
                if self.evaluate_condition(condition, context)? {
                    self.execute_operation(nested, context, pools)?;
                }
                Ok(())
            }
            Operation::Project { relation, values } => {
                let tuple = values
                    .iter()
                    .map(|value| self.evaluate_expression(value, context))
                    .collect::<Result<Tuple, _>>()?;
                self.store.insert(*relation, tuple);
                Ok(())
            }
            Operation::UnpackRecord {
                expression,
                arity,
                tuple_id,
                nested,
            } => {
                let handle = self.evaluate_expression(expression, context)?;
                if let Some(fields) = self.records.unpack(handle, *arity) {
                    context.set_tuple(*tuple_id, fields);
                    self.execute_operation(nested, context, pools)?;
                }
                Ok(())
            }
            Operation::Frequency { rule, nested } => {
                self.profile
                    .count_rule(rule, self.iteration.load(Ordering::Relaxed));
                self.execute_operation(nested, context, pools)
            }
            Operation::ReturnValue { values } => {
                for value in values {
                    match value {
                        Expression::Undefined => context.push_return(0, true),
                        defined => {
                            let value = self.evaluate_expression(defined, context)?;
                            context.push_return(value, false);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Evaluate a per-attribute pattern; [Expression::Undefined] entries
    /// stay unconstrained.
    fn evaluate_pattern(
        &self,
        pattern: &[Expression],
        context: &EvaluationContext,
    ) -> Result<Vec<Option<StorageValue>>, Error> {
        pattern
            .iter()
            .map(|entry| match entry {
                Expression::Undefined => Ok(None),
                defined => self.evaluate_expression(defined, context).map(Some),
            })
            .collect()
    }

    /// Snapshot the tuples of an index range, releasing all locks before
    /// the caller iterates or partitions them.
    fn materialize_range(
        &self,
        relation: RelationId,
        index: usize,
        lower: &[Expression],
        upper: &[Expression],
        context: &EvaluationContext,
    ) -> Result<Vec<Tuple>, Error> {
        let lower = self.evaluate_pattern(lower, context)?;
        let upper = self.evaluate_pattern(upper, context)?;
        Ok(self
            .store
            .relation(relation)
            .index(index)
            .collect_range(&lower, &upper))
    }

    /// Contiguous chunk size splitting `total` items over the worker pool.
    fn chunk_size(&self, total: usize) -> usize {
        let workers = self.worker_pool.current_num_threads().max(1);
        total.div_ceil(workers).max(1)
    }

    /// Execute `nested` for every tuple, partitioned across the worker
    /// pool. Each worker evaluates on its own cloned context and its own
    /// cursor pools, so sequential scans nested below a parallel operator
    /// never share slots between workers.
    fn run_parallel_scan(
        &self,
        tuples: Vec<Tuple>,
        tuple_id: usize,
        nested: &Operation,
        context: &mut EvaluationContext,
    ) -> Result<(), Error> {
        let base = context.clone();
        let chunk_size = self.chunk_size(tuples.len());

        self.worker_pool.install(|| {
            tuples.par_chunks(chunk_size).try_for_each(|chunk| {
                let mut context = base.clone();
                let mut pools = CursorPools::default();
                for tuple in chunk {
                    context.set_tuple(tuple_id, tuple.clone());
                    self.execute_operation(nested, &mut context, &mut pools)?;
                }
                Ok(())
            })
        })
    }

    /// Search the tuples for one satisfying the filter, partitioned across
    /// the worker pool. Which satisfying tuple wins is unspecified.
    fn run_parallel_choice(
        &self,
        tuples: Vec<Tuple>,
        filter: &Condition,
        tuple_id: usize,
        context: &EvaluationContext,
    ) -> Result<Option<Tuple>, Error> {
        let base = context.clone();
        let chunk_size = self.chunk_size(tuples.len());
        let chosen: Mutex<Option<Tuple>> = Mutex::new(None);
        let stop = AtomicBool::new(false);

        self.worker_pool.install(|| {
            tuples.par_chunks(chunk_size).try_for_each(|chunk| -> Result<(), Error> {
                let mut context = base.clone();
                for tuple in chunk {
                    if stop.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                    context.set_tuple(tuple_id, tuple.clone());
                    if self.evaluate_condition(filter, &context)? {
                        stop.store(true, Ordering::Relaxed);
                        let mut chosen = chosen.lock().expect("choice result lock poisoned");
                        if chosen.is_none() {
                            *chosen = Some(tuple.clone());
                        }
                        return Ok(());
                    }
                }
                Ok(())
            })
        })?;

        Ok(chosen.into_inner().expect("choice result lock poisoned"))
    }

    /// Fold one aggregate over a tuple snapshot. The current tuple is
    /// bound at `tuple_id` while iterating so filter and expression can
    /// refer to it.
    fn fold_aggregate(
        &self,
        tuples: &[Tuple],
        function: AggregateFunction,
        expression: Option<&Expression>,
        filter: &Condition,
        tuple_id: usize,
        context: &mut EvaluationContext,
    ) -> Result<AggregateAccumulator, Error> {
        let mut accumulator = AggregateAccumulator::new(function);

        for tuple in tuples {
            context.set_tuple(tuple_id, tuple.clone());
            if !self.evaluate_condition(filter, context)? {
                continue;
            }

            let value = match expression {
                Some(expression) => self.evaluate_expression(expression, context)?,
                None => 0,
            };
            accumulator.push(value);
        }

        Ok(accumulator)
    }

    /// [fold_aggregate][Self::fold_aggregate] partitioned across the
    /// worker pool; the partial accumulators combine into the same result
    /// the sequential fold produces.
    fn fold_parallel_aggregate(
        &self,
        tuples: Vec<Tuple>,
        function: AggregateFunction,
        expression: Option<&Expression>,
        filter: &Condition,
        tuple_id: usize,
        context: &EvaluationContext,
    ) -> Result<AggregateAccumulator, Error> {
        let base = context.clone();
        let chunk_size = self.chunk_size(tuples.len());

        self.worker_pool.install(|| {
            tuples
                .par_chunks(chunk_size)
                .map(|chunk| {
                    let mut context = base.clone();
                    self.fold_aggregate(chunk, function, expression, filter, tuple_id, &mut context)
                })
                .try_reduce(
                    || AggregateAccumulator::new(function),
                    |left, right| Ok(left.combine(right)),
                )
        })
    }

    /// Bind an aggregate result as a unary tuple and run the nested
    /// operation once; an empty min/max binds nothing and skips it.
    fn finish_aggregate(
        &self,
        accumulator: AggregateAccumulator,
        tuple_id: usize,
        nested: &Operation,
        context: &mut EvaluationContext,
        pools: &mut CursorPools,
    ) -> Result<(), Error> {
        if let Some(result) = accumulator.finish() {
            context.set_tuple(tuple_id, vec![result]);
            self.execute_operation(nested, context, pools)?;
        }
        Ok(())
    }

    /// Evaluate a condition against the current bindings.
    fn evaluate_condition(
        &self,
        condition: &Condition,
        context: &EvaluationContext,
    ) -> Result<bool, Error> {
        match condition {
            Condition::True => Ok(true),
            Condition::Conjunction(children) => {
                for child in children {
                    if !self.evaluate_condition(child, context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Negation(inner) => Ok(!self.evaluate_condition(inner, context)?),
            Condition::Comparison { op, left, right } => {
                let left = self.evaluate_expression(left, context)?;
                let right = self.evaluate_expression(right, context)?;
                self.compare(*op, left, right)
            }
            Condition::EmptinessCheck { relation } => Ok(self.store.size(*relation) == 0),
            Condition::ExistenceCheck {
                relation,
                index,
                pattern,
            } => {
                self.profile.count_read(*relation);
                let values = self.evaluate_pattern(pattern, context)?;
                let guard = self.store.relation(*relation);
                Ok(guard.index(*index).matches(&values))
            }
        }
    }

    fn compare(
        &self,
        op: ComparisonOperator,
        left: StorageValue,
        right: StorageValue,
    ) -> Result<bool, Error> {
        Ok(match op {
            ComparisonOperator::Equal => left == right,
            ComparisonOperator::NotEqual => left != right,
            ComparisonOperator::Less => left < right,
            ComparisonOperator::LessEqual => left <= right,
            ComparisonOperator::Greater => left > right,
            ComparisonOperator::GreaterEqual => left >= right,
            ComparisonOperator::Contains => self
                .symbols
                .resolve(right)
                .contains(&self.symbols.resolve(left)),
            ComparisonOperator::NotContains => !self
                .symbols
                .resolve(right)
                .contains(&self.symbols.resolve(left)),
            ComparisonOperator::Match => {
                self.match_pattern(&self.symbols.resolve(left), &self.symbols.resolve(right))
            }
            ComparisonOperator::NotMatch => {
                !self.match_pattern(&self.symbols.resolve(left), &self.symbols.resolve(right))
            }
        })
    }

    /// Match `text` against a cached regular expression. An invalid
    /// pattern matches nothing and is reported once.
    fn match_pattern(&self, pattern: &str, text: &str) -> bool {
        let mut cache = self
            .match_patterns
            .lock()
            .expect("match pattern cache lock poisoned");

        if !cache.contains_key(pattern) {
            let compiled = match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(error) => {
                    log::warn!("invalid match pattern \"{pattern}\": {error}");
                    None
                }
            };
            cache.insert(pattern.to_string(), compiled);
        }

        cache
            .get(pattern)
            .and_then(Option::as_ref)
            .is_some_and(|regex| regex.is_match(text))
    }

    /// Evaluate a scalar expression against the current bindings.
    fn evaluate_expression(
        &self,
        expression: &Expression,
        context: &EvaluationContext,
    ) -> Result<StorageValue, Error> {
        match expression {
            Expression::Constant(value) => Ok(*value),
            Expression::TupleElement { tuple_id, element } => {
                Ok(context.tuple(*tuple_id)[*element])
            }
            Expression::SubroutineArgument(index) => Ok(context.argument(*index)),
            Expression::AutoIncrement => Ok(self.counter.fetch_add(1, Ordering::Relaxed)),
            Expression::Undefined => {
                panic!("Undefined expressions are only valid inside patterns and return values.")
            }
            Expression::UnaryOp { op, operand } => {
                let value = self.evaluate_expression(operand, context)?;
                Ok(self.apply_unary(*op, value))
            }
            Expression::BinaryOp { op, left, right } => {
                let left = self.evaluate_expression(left, context)?;
                let right = self.evaluate_expression(right, context)?;
                Ok(self.apply_binary(*op, left, right))
            }
            Expression::FunctorCall { name, arguments } => {
                let functor = self.resolve_functor(name, arguments.len())?;
                let values = arguments
                    .iter()
                    .map(|argument| self.evaluate_expression(argument, context))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(functor(&values))
            }
            Expression::PackRecord { arguments } => {
                let values = arguments
                    .iter()
                    .map(|argument| self.evaluate_expression(argument, context))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.records.pack(&values))
            }
        }
    }

    fn apply_unary(&self, op: UnaryOperator, value: StorageValue) -> StorageValue {
        match op {
            UnaryOperator::Negate => value.wrapping_neg(),
            UnaryOperator::BitwiseNot => !value,
            UnaryOperator::LogicalNot => StorageValue::from(value == 0),
            UnaryOperator::StringLength => self.symbols.resolve(value).len() as StorageValue,
            UnaryOperator::StringToNumber => {
                let string = self.symbols.resolve(value);
                string
                    .trim()
                    .parse()
                    .unwrap_or_else(|_| panic!("Cannot convert \"{string}\" to a number."))
            }
            UnaryOperator::NumberToString => self.symbols.intern(&value.to_string()),
        }
    }

    fn apply_binary(
        &self,
        op: BinaryOperator,
        left: StorageValue,
        right: StorageValue,
    ) -> StorageValue {
        match op {
            BinaryOperator::Add => left.wrapping_add(right),
            BinaryOperator::Subtract => left.wrapping_sub(right),
            BinaryOperator::Multiply => left.wrapping_mul(right),
            BinaryOperator::Divide => {
                assert!(right != 0, "Division by zero.");
                left.wrapping_div(right)
            }
            BinaryOperator::Exponent => {
                if right < 0 {
                    0
                } else {
                    left.wrapping_pow(right.min(StorageValue::from(u32::MAX)) as u32)
                }
            }
            BinaryOperator::Modulo => {
                assert!(right != 0, "Modulo by zero.");
                left.wrapping_rem(right)
            }
            BinaryOperator::BitwiseAnd => left & right,
            BinaryOperator::BitwiseOr => left | right,
            BinaryOperator::BitwiseXor => left ^ right,
            BinaryOperator::LogicalAnd => StorageValue::from(left != 0 && right != 0),
            BinaryOperator::LogicalOr => StorageValue::from(left != 0 || right != 0),
            BinaryOperator::Maximum => left.max(right),
            BinaryOperator::Minimum => left.min(right),
            BinaryOperator::Concatenate => {
                let concatenated = self.symbols.resolve(left) + &self.symbols.resolve(right);
                self.symbols.intern(&concatenated)
            }
        }
    }

    /// Resolve a functor through the injected capability, caching the
    /// result for reuse by later calls.
    fn resolve_functor(&self, name: &str, arity: usize) -> Result<ResolvedFunctor, Error> {
        let mut cache = self.functors.lock().expect("functor cache lock poisoned");

        if let Some(functor) = cache.resolved.get(name) {
            return Ok(functor.clone());
        }

        let resolver = cache
            .resolver
            .as_ref()
            .ok_or_else(|| Error::NoFunctorResolver {
                name: name.to_string(),
            })?;
        let functor = resolver.resolve(name, arity)?;

        log::debug!("resolved functor \"{name}\" with arity {arity}");
        cache.resolved.insert(name.to_string(), functor.clone());

        Ok(functor)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use test_log::test;

    use crate::{
        dictionary::{record_table::RecordTable, symbol_table::SymbolTable},
        error::Error,
        execution::execution_parameters::ExecutionParameters,
        functors::RegistryResolver,
        ram::{
            aggregates::AggregateFunction,
            condition::{ComparisonOperator, Condition},
            expression::{BinaryOperator, Expression},
            operation::Operation,
            program::Program,
            relation::{RelationDecl, RelationId},
            statement::Statement,
        },
    };

    use super::ExecutionEngine;

    fn engine(program: Program) -> ExecutionEngine {
        engine_with(program, ExecutionParameters::default())
    }

    fn engine_with(program: Program, parameters: ExecutionParameters) -> ExecutionEngine {
        ExecutionEngine::initialize(
            program,
            parameters,
            Arc::new(SymbolTable::new()),
            Arc::new(RecordTable::new()),
        )
        .expect("engine initialization failed")
    }

    /// Declarations for one binary input relation and one binary output.
    fn copy_program(body: Operation) -> (Program, RelationId, RelationId) {
        let relations = vec![RelationDecl::new("input", 2), RelationDecl::new("output", 2)];
        let program = Program::new(relations, Statement::Query(body));
        (program, RelationId::new(0), RelationId::new(1))
    }

    #[test]
    fn autoincrement_counts_from_zero() {
        let mut program = Program::new(vec![], Statement::Sequence(vec![]));
        program.add_subroutine(
            "counters",
            Statement::Query(Operation::ReturnValue {
                values: vec![
                    Expression::AutoIncrement,
                    Expression::AutoIncrement,
                    Expression::AutoIncrement,
                ],
            }),
        );

        let engine = engine(program);
        engine.execute_main().unwrap();

        let result = engine.execute_subroutine("counters", &[]).unwrap();
        assert_eq!(result.values, vec![0, 1, 2]);
        assert_eq!(result.undefined, vec![false, false, false]);
    }

    #[test]
    fn count_subroutine_over_edges() {
        let mut program = Program::new(
            vec![RelationDecl::new("edge", 2)],
            Statement::Sequence(vec![]),
        );
        let edge = program.relation_id("edge").unwrap();
        program.add_subroutine(
            "count_edges",
            Statement::Query(Operation::Aggregate {
                relation: edge,
                function: AggregateFunction::Count,
                expression: None,
                filter: Condition::True,
                tuple_id: 0,
                nested: Box::new(Operation::ReturnValue {
                    values: vec![Expression::element(0, 0)],
                }),
            }),
        );

        let engine = engine(program);
        engine.store().insert(edge, vec![1, 2]);
        engine.store().insert(edge, vec![2, 3]);

        let result = engine.execute_subroutine("count_edges", &[]).unwrap();
        assert_eq!(result.values, vec![2]);
    }

    #[test]
    fn min_over_empty_input_skips_nested_operation() {
        let mut program = Program::new(
            vec![RelationDecl::new("numbers", 1)],
            Statement::Sequence(vec![]),
        );
        let numbers = program.relation_id("numbers").unwrap();
        program.add_subroutine(
            "minimum",
            Statement::Query(Operation::Aggregate {
                relation: numbers,
                function: AggregateFunction::Min,
                expression: Some(Expression::element(0, 0)),
                filter: Condition::True,
                tuple_id: 0,
                nested: Box::new(Operation::ReturnValue {
                    values: vec![Expression::element(0, 0)],
                }),
            }),
        );

        let engine = engine(program);

        // No tuples matched: nothing is bound and nothing is returned.
        let result = engine.execute_subroutine("minimum", &[]).unwrap();
        assert!(result.values.is_empty());

        engine.store().insert(numbers, vec![7]);
        engine.store().insert(numbers, vec![3]);
        let result = engine.execute_subroutine("minimum", &[]).unwrap();
        assert_eq!(result.values, vec![3]);
    }

    #[test]
    fn scan_with_filter_copies_matching_tuples() {
        let (program, input, output) = copy_program(Operation::Scan {
            relation: RelationId::new(0),
            tuple_id: 0,
            slot: 0,
            nested: Box::new(Operation::Filter {
                condition: Condition::Comparison {
                    op: ComparisonOperator::Greater,
                    left: Expression::element(0, 1),
                    right: Expression::Constant(10),
                },
                nested: Box::new(Operation::Project {
                    relation: RelationId::new(1),
                    values: vec![Expression::element(0, 0), Expression::element(0, 1)],
                }),
            }),
        });

        let engine = engine(program);
        engine.store().insert(input, vec![1, 5]);
        engine.store().insert(input, vec![2, 15]);
        engine.store().insert(input, vec![3, 25]);

        engine.execute_main().unwrap();
        assert_eq!(
            engine.store().contents(output),
            vec![vec![2, 15], vec![3, 25]]
        );
    }

    #[test]
    fn choice_binds_at_most_one_tuple() {
        let (program, input, output) = copy_program(Operation::Choice {
            relation: RelationId::new(0),
            filter: Condition::Comparison {
                op: ComparisonOperator::Equal,
                left: Expression::element(0, 0),
                right: Expression::Constant(2),
            },
            tuple_id: 0,
            slot: 0,
            nested: Box::new(Operation::Project {
                relation: RelationId::new(1),
                values: vec![Expression::element(0, 0), Expression::element(0, 1)],
            }),
        });

        let engine = engine(program);
        engine.store().insert(input, vec![1, 1]);
        engine.store().insert(input, vec![2, 1]);
        engine.store().insert(input, vec![2, 2]);

        engine.execute_main().unwrap();
        assert_eq!(engine.store().size(output), 1);
        assert_eq!(engine.store().contents(output)[0][0], 2);
    }

    #[test]
    fn parallel_variants_match_sequential_results() {
        for function in [
            AggregateFunction::Count,
            AggregateFunction::Sum,
            AggregateFunction::Min,
            AggregateFunction::Max,
        ] {
            let aggregate = |parallel: bool| {
                let relations = vec![
                    RelationDecl::new("numbers", 1),
                    RelationDecl::new("result", 1),
                ];
                let nested = Box::new(Operation::Project {
                    relation: RelationId::new(1),
                    values: vec![Expression::element(0, 0)],
                });
                let body = if parallel {
                    Operation::ParallelAggregate {
                        relation: RelationId::new(0),
                        function,
                        expression: Some(Expression::element(0, 0)),
                        filter: Condition::True,
                        tuple_id: 0,
                        nested,
                    }
                } else {
                    Operation::Aggregate {
                        relation: RelationId::new(0),
                        function,
                        expression: Some(Expression::element(0, 0)),
                        filter: Condition::True,
                        tuple_id: 0,
                        nested,
                    }
                };

                let mut parameters = ExecutionParameters::default();
                parameters.set_num_threads(4);
                let engine = engine_with(
                    Program::new(relations, Statement::Query(body)),
                    parameters,
                );
                for value in [3, -7, 12, 0, 5, 42, -1] {
                    engine.store().insert(RelationId::new(0), vec![value]);
                }
                engine.execute_main().unwrap();
                engine.store().contents(RelationId::new(1))
            };

            assert_eq!(aggregate(false), aggregate(true), "{function:?}");
        }
    }

    #[test]
    fn parallel_scan_inserts_every_tuple() {
        let (sequential, input, output) = copy_program(Operation::Scan {
            relation: RelationId::new(0),
            tuple_id: 0,
            slot: 0,
            nested: Box::new(Operation::Project {
                relation: RelationId::new(1),
                values: vec![Expression::element(0, 1), Expression::element(0, 0)],
            }),
        });
        let (parallel, _, _) = copy_program(Operation::ParallelScan {
            relation: RelationId::new(0),
            tuple_id: 0,
            nested: Box::new(Operation::Project {
                relation: RelationId::new(1),
                values: vec![Expression::element(0, 1), Expression::element(0, 0)],
            }),
        });

        let mut results = Vec::new();
        for program in [sequential, parallel] {
            let mut parameters = ExecutionParameters::default();
            parameters.set_num_threads(4);
            let engine = engine_with(program, parameters);
            for value in 0..100 {
                engine.store().insert(input, vec![value, value + 1]);
            }
            engine.execute_main().unwrap();
            results.push(engine.store().contents(output));
        }

        assert_eq!(results[0].len(), 100);
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn functor_calls_resolve_through_the_registry() {
        let relations = vec![RelationDecl::new("result", 1)];
        let program = Program::new(
            relations,
            Statement::Query(Operation::Project {
                relation: RelationId::new(0),
                values: vec![Expression::FunctorCall {
                    name: "double".to_string(),
                    arguments: vec![Expression::Constant(21)],
                }],
            }),
        );

        let mut registry = RegistryResolver::new();
        registry.register("double", |args| args[0].wrapping_mul(2));
        let mut parameters = ExecutionParameters::default();
        parameters.set_functor_resolver(Box::new(registry));

        let engine = engine_with(program, parameters);
        engine.execute_main().unwrap();
        assert_eq!(engine.store().contents(RelationId::new(0)), vec![vec![42]]);
    }

    #[test]
    fn functor_call_without_resolver_is_an_error() {
        let relations = vec![RelationDecl::new("result", 1)];
        let program = Program::new(
            relations,
            Statement::Query(Operation::Project {
                relation: RelationId::new(0),
                values: vec![Expression::FunctorCall {
                    name: "missing".to_string(),
                    arguments: vec![],
                }],
            }),
        );

        let engine = engine(program);
        assert!(matches!(
            engine.execute_main(),
            Err(Error::NoFunctorResolver { .. })
        ));
    }

    #[test]
    fn unpack_record_binds_fields() {
        let records = Arc::new(RecordTable::new());
        let handle = records.pack(&[10, 20]);

        let relations = vec![RelationDecl::new("fields", 2)];
        let program = Program::new(
            relations,
            Statement::Query(Operation::UnpackRecord {
                expression: Expression::Constant(handle),
                arity: 2,
                tuple_id: 0,
                nested: Box::new(Operation::Project {
                    relation: RelationId::new(0),
                    values: vec![Expression::element(0, 0), Expression::element(0, 1)],
                }),
            }),
        );

        let engine = ExecutionEngine::initialize(
            program,
            ExecutionParameters::default(),
            Arc::new(SymbolTable::new()),
            records,
        )
        .unwrap();

        engine.execute_main().unwrap();
        assert_eq!(
            engine.store().contents(RelationId::new(0)),
            vec![vec![10, 20]]
        );
    }

    #[test]
    fn pack_record_of_nil_skips_unpack() {
        let relations = vec![RelationDecl::new("fields", 1)];
        let program = Program::new(
            relations,
            Statement::Query(Operation::UnpackRecord {
                expression: Expression::Constant(crate::dictionary::record_table::NIL_RECORD),
                arity: 1,
                tuple_id: 0,
                nested: Box::new(Operation::Project {
                    relation: RelationId::new(0),
                    values: vec![Expression::element(0, 0)],
                }),
            }),
        );

        let engine = engine(program);
        engine.execute_main().unwrap();
        assert_eq!(engine.store().size(RelationId::new(0)), 0);
    }

    #[test]
    fn subroutine_arguments_flow_into_expressions() {
        let mut program = Program::new(vec![], Statement::Sequence(vec![]));
        program.add_subroutine(
            "successor",
            Statement::Query(Operation::ReturnValue {
                values: vec![
                    Expression::binary(
                        BinaryOperator::Add,
                        Expression::SubroutineArgument(0),
                        Expression::Constant(1),
                    ),
                    Expression::Undefined,
                ],
            }),
        );

        let engine = engine(program);
        let result = engine.execute_subroutine("successor", &[41]).unwrap();
        assert_eq!(result.values, vec![42, 0]);
        assert_eq!(result.undefined, vec![false, true]);
    }

    #[test]
    #[should_panic(expected = "No subroutine named")]
    fn unknown_subroutine_panics() {
        let engine = engine(Program::new(vec![], Statement::Sequence(vec![])));
        let _ = engine.execute_subroutine("missing", &[]);
    }

    #[test]
    fn string_operations_go_through_the_symbol_table() {
        let symbols = Arc::new(SymbolTable::new());
        let hello = symbols.intern("hello ");
        let world = symbols.intern("world");

        let relations = vec![RelationDecl::new("result", 1)];
        let program = Program::new(
            relations,
            Statement::Query(Operation::Project {
                relation: RelationId::new(0),
                values: vec![Expression::binary(
                    BinaryOperator::Concatenate,
                    Expression::Constant(hello),
                    Expression::Constant(world),
                )],
            }),
        );

        let engine = ExecutionEngine::initialize(
            program,
            ExecutionParameters::default(),
            symbols.clone(),
            Arc::new(RecordTable::new()),
        )
        .unwrap();
        engine.execute_main().unwrap();

        let handle = engine.store().contents(RelationId::new(0))[0][0];
        assert_eq!(symbols.resolve(handle), "hello world");
    }

    #[test]
    fn existence_checks_are_counted_when_profiling() {
        let relations = vec![RelationDecl::new("edge", 2), RelationDecl::new("out", 2)];
        let edge = RelationId::new(0);
        let body = Operation::Scan {
            relation: edge,
            tuple_id: 0,
            slot: 0,
            nested: Box::new(Operation::Frequency {
                rule: "out(x,y) :- edge(x,y), !edge(y,x).".to_string(),
                nested: Box::new(Operation::Filter {
                    condition: Condition::not_exists(
                        edge,
                        0,
                        vec![Expression::element(0, 1), Expression::element(0, 0)],
                    ),
                    nested: Box::new(Operation::Project {
                        relation: RelationId::new(1),
                        values: vec![Expression::element(0, 0), Expression::element(0, 1)],
                    }),
                }),
            }),
        };

        let mut parameters = ExecutionParameters::default();
        parameters.set_profiling(true);
        let engine = engine_with(Program::new(relations, Statement::Query(body)), parameters);
        engine.store().insert(edge, vec![1, 2]);
        engine.store().insert(edge, vec![2, 1]);
        engine.store().insert(edge, vec![3, 4]);

        engine.execute_main().unwrap();

        // (1,2) and (2,1) eliminate each other, (3,4) survives.
        assert_eq!(engine.store().contents(RelationId::new(1)), vec![vec![3, 4]]);
        assert_eq!(engine.profile().relation_reads(edge), 3);

        let frequencies = engine.profile().rule_frequencies();
        assert_eq!(frequencies.len(), 1);
        assert_eq!(frequencies[0].1, 3);
    }

    #[test]
    fn index_choice_searches_only_the_range() {
        let (program, input, output) = copy_program(Operation::IndexChoice {
            relation: RelationId::new(0),
            index: 0,
            lower: vec![Expression::Constant(2), Expression::Undefined],
            upper: vec![Expression::Constant(2), Expression::Undefined],
            filter: Condition::Comparison {
                op: ComparisonOperator::GreaterEqual,
                left: Expression::element(0, 1),
                right: Expression::Constant(10),
            },
            tuple_id: 0,
            slot: 0,
            nested: Box::new(Operation::Project {
                relation: RelationId::new(1),
                values: vec![Expression::element(0, 0), Expression::element(0, 1)],
            }),
        });

        let engine = engine(program);
        // (1,50) satisfies the filter but lies outside the range.
        engine.store().insert(input, vec![1, 50]);
        engine.store().insert(input, vec![2, 5]);
        engine.store().insert(input, vec![2, 30]);

        engine.execute_main().unwrap();
        assert_eq!(engine.store().contents(output), vec![vec![2, 30]]);
    }

    #[test]
    fn parallel_choice_finds_a_satisfying_tuple() {
        let (program, input, output) = copy_program(Operation::ParallelChoice {
            relation: RelationId::new(0),
            filter: Condition::Comparison {
                op: ComparisonOperator::Equal,
                left: Expression::element(0, 1),
                right: Expression::Constant(-1),
            },
            tuple_id: 0,
            nested: Box::new(Operation::Project {
                relation: RelationId::new(1),
                values: vec![Expression::element(0, 0), Expression::element(0, 1)],
            }),
        });

        let mut parameters = ExecutionParameters::default();
        parameters.set_num_threads(4);
        let engine = engine_with(program, parameters);
        for value in 0..200 {
            engine.store().insert(input, vec![value, value % 7 - 1]);
        }

        engine.execute_main().unwrap();

        let chosen = engine.store().contents(output);
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0][1], -1);
    }

    #[test]
    fn index_aggregate_folds_over_the_range() {
        let relations = vec![
            RelationDecl::new("readings", 2),
            RelationDecl::new("result", 1),
        ];
        let program = Program::new(
            relations,
            Statement::Query(Operation::IndexAggregate {
                relation: RelationId::new(0),
                index: 0,
                lower: vec![Expression::Constant(1), Expression::Undefined],
                upper: vec![Expression::Constant(1), Expression::Undefined],
                function: AggregateFunction::Sum,
                expression: Some(Expression::element(0, 1)),
                filter: Condition::True,
                tuple_id: 0,
                nested: Box::new(Operation::Project {
                    relation: RelationId::new(1),
                    values: vec![Expression::element(0, 0)],
                }),
            }),
        );

        let engine = engine(program);
        engine.store().insert(RelationId::new(0), vec![1, 10]);
        engine.store().insert(RelationId::new(0), vec![1, 20]);
        engine.store().insert(RelationId::new(0), vec![2, 100]);

        engine.execute_main().unwrap();
        assert_eq!(engine.store().contents(RelationId::new(1)), vec![vec![30]]);
    }
}
