use crate::store::{Connector, Store};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConnectError(#[from] anyhow::Error);

/// Lets an `r2d2` pool hand out connections from any [`Connector`].
pub struct StoreManager {
    connector: Arc<dyn Connector>,
}

impl StoreManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        StoreManager { connector }
    }
}

impl r2d2::ManageConnection for StoreManager {
    type Connection = Box<dyn Store>;
    type Error = ConnectError;

    fn connect(&self) -> Result<Box<dyn Store>, ConnectError> {
        Ok(self.connector.connect()?)
    }

    fn is_valid(&self, _conn: &mut Box<dyn Store>) -> Result<(), ConnectError> {
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Box<dyn Store>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::payload;
    use crate::store::{Codec, MemoryConnector};

    #[test]
    fn pool_never_exceeds_its_size() {
        let c = MemoryConnector::new(Codec::Fast);
        let pool = r2d2::Pool::builder()
            .max_size(2)
            .test_on_check_out(false)
            .build(StoreManager::new(c.share()))
            .unwrap();
        let mut a = pool.get().unwrap();
        let mut b = pool.get().unwrap();
        a.set(1, payload(4)).unwrap();
        assert!(b.get(1).unwrap());
        assert!(pool.try_get().is_none());
        drop(a);
        assert!(pool.try_get().is_some());
        assert_eq!(c.stats().ops_per_connection().len(), 2);
    }
}
