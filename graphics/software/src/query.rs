use std::sync::Arc;

use parking_lot::Mutex;
use raycts_core::gpu::{
    self,
    BackendError,
    QueryType,
};

struct QueryPoolInner {
    query_type: QueryType,
    results: Mutex<Vec<Option<u64>>>,
}

#[derive(Clone)]
pub struct SoftQueryPool {
    inner: Arc<QueryPoolInner>,
}

impl SoftQueryPool {
    pub(crate) fn new(query_type: QueryType, query_count: u32) -> Self {
        Self {
            inner: Arc::new(QueryPoolInner {
                query_type,
                results: Mutex::new(vec![None; query_count as usize]),
            }),
        }
    }

    fn check_range(&self, first_query: u32, count: usize) -> Result<(), BackendError> {
        let query_count = self.inner.results.lock().len();
        if first_query as usize + count > query_count {
            return Err(BackendError::invalid_usage(format!(
                "queries {}..{} exceed the pool size of {}",
                first_query,
                first_query as usize + count,
                query_count
            )));
        }
        Ok(())
    }

    pub(crate) fn reset_range(&self, first_query: u32, query_count: u32) -> Result<(), BackendError> {
        self.check_range(first_query, query_count as usize)?;
        let mut results = self.inner.results.lock();
        for result in &mut results[first_query as usize..(first_query + query_count) as usize] {
            *result = None;
        }
        Ok(())
    }

    pub(crate) fn write(&self, first_query: u32, values: &[u64]) -> Result<(), BackendError> {
        self.check_range(first_query, values.len())?;
        let mut results = self.inner.results.lock();
        for (result, value) in results[first_query as usize..].iter_mut().zip(values) {
            *result = Some(*value);
        }
        Ok(())
    }
}

impl gpu::QueryPool for SoftQueryPool {
    fn query_type(&self) -> QueryType {
        self.inner.query_type
    }

    fn query_count(&self) -> u32 {
        self.inner.results.lock().len() as u32
    }

    unsafe fn reset(&self) {
        for result in self.inner.results.lock().iter_mut() {
            *result = None;
        }
    }

    fn get_results(&self, first_query: u32, results: &mut [u64]) -> Result<(), BackendError> {
        self.check_range(first_query, results.len())?;
        let available = self.inner.results.lock();
        for (result, value) in results.iter_mut().zip(&available[first_query as usize..]) {
            *result = value.ok_or(BackendError::NotReady)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use raycts_core::gpu::QueryPool;

    use super::*;

    #[test]
    fn results_are_unavailable_until_written() {
        let pool = SoftQueryPool::new(QueryType::AccelerationStructureCompactedSize, 4);
        let mut results = [0u64; 2];
        assert_eq!(pool.get_results(1, &mut results), Err(BackendError::NotReady));
        pool.write(1, &[64, 128]).unwrap();
        pool.get_results(1, &mut results).unwrap();
        assert_eq!(results, [64, 128]);
        pool.reset_range(2, 1).unwrap();
        assert_eq!(pool.get_results(1, &mut results), Err(BackendError::NotReady));
    }

    #[test]
    fn out_of_range_queries_are_rejected() {
        let pool = SoftQueryPool::new(QueryType::AccelerationStructureSerializationSize, 1);
        let mut results = [0u64; 2];
        assert!(matches!(pool.get_results(0, &mut results), Err(BackendError::InvalidUsage(_))));
    }
}
