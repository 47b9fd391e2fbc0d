//! Query processing
//!
//! A query travels through a fixed pipeline:
//! - [`lexer`]: text to tokens, plus the canonical form used as cache key
//! - [`parser`]: tokens to [`ast::Query`] (pest grammar, Pratt expressions)
//! - [`validate`]: scope and semantic checks
//! - [`lower`]: AST to the [`ir::LogicalPlan`]
//! - [`executor`]: Volcano-style operators over a snapshot or a transaction
//!
//! [`QueryEngine`] ties the compile stages together and caches plans by
//! canonical query text.

pub mod ast;
pub mod error;
pub mod executor;
pub mod functions;
pub mod ir;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod validate;

pub use ast::Query;
pub use error::{CompileError, CompileErrorKind, CompileResult};
pub use executor::{
    execute_plan, ExecContext, ExecutionError, ExecutionResult, GraphAccess, Params, QueryResult, QueryStats,
    Record, Value,
};
pub use functions::{Arity, FunctionId, FunctionRegistry, ScalarFunction};
pub use ir::LogicalPlan;
pub use parser::parse_query;

use crate::graph::GraphRead;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Plan cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Compiler front end with a plan cache
///
/// Two texts that differ only in whitespace, comments or keyword case share
/// one cache entry.
pub struct QueryEngine {
    /// `None` when caching is disabled
    cache: Option<Mutex<LruCache<String, Arc<LogicalPlan>>>>,
    functions: RwLock<Arc<FunctionRegistry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryEngine {
    /// Engine with the builtin functions and a cache of `cache_capacity` plans
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(cache_capacity).map(|c| Mutex::new(LruCache::new(c))),
            functions: RwLock::new(Arc::new(FunctionRegistry::with_builtins())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Compile `text` into a logical plan, reusing a cached plan when possible
    pub fn compile(&self, text: &str) -> CompileResult<Arc<LogicalPlan>> {
        let tokens = lexer::tokenize(text)?;
        let key = lexer::canonical(&tokens);

        if let Some(cache) = &self.cache {
            if let Some(plan) = cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(query = %key, "plan cache hit");
                return Ok(plan.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let query = parser::parse_tokens(text, &tokens)?;
        validate::validate(&query)?;
        let plan = Arc::new(lower::lower(&query, &self.functions())?);
        debug!(query = %key, branches = plan.branches.len(), read_only = plan.read_only, "compiled query");

        if let Some(cache) = &self.cache {
            cache.lock().unwrap_or_else(|e| e.into_inner()).put(key, plan.clone());
        }
        Ok(plan)
    }

    /// The function registry plans are compiled and executed against
    pub fn functions(&self) -> Arc<FunctionRegistry> {
        self.functions.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Register a scalar function; cached plans are dropped so lookups see it
    pub fn register_function<F>(&self, name: &str, arity: usize, function: F) -> FunctionId
    where
        F: Fn(&dyn GraphRead, &[Value]) -> ExecutionResult<Value> + Send + Sync + 'static,
    {
        let id = {
            let mut guard = self.functions.write().unwrap_or_else(|e| e.into_inner());
            let mut registry = (**guard).clone();
            let id = registry.register(name, arity, function);
            *guard = Arc::new(registry);
            id
        };
        self.clear_cache();
        id
    }

    pub fn cache_stats(&self) -> PlanCacheStats {
        PlanCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self
                .cache
                .as_ref()
                .map(|c| c.lock().unwrap_or_else(|e| e.into_inner()).len())
                .unwrap_or(0),
        }
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(256)
    }
}
