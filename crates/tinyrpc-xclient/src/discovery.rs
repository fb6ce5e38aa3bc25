//! Server discovery and selection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tinyrpc_common::protocol::error::{Result, RpcError};

/// How a server is picked for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniformly random over the current set.
    Random,
    /// Cycles through the current set.
    RoundRobin,
}

/// Source of server addresses (`protocol@addr`).
pub trait Discovery: Send + Sync {
    /// Reloads the server set from wherever it comes from.
    fn refresh(&self) -> Result<()>;

    /// Replaces the server set.
    fn update(&self, servers: Vec<String>) -> Result<()>;

    /// Picks one server.
    fn get(&self, mode: SelectMode) -> Result<String>;

    /// Snapshot of every server.
    fn get_all(&self) -> Result<Vec<String>>;
}

struct Servers {
    servers: Vec<String>,
    /// round-robin cursor
    index: usize,
    rng: StdRng,
}

/// Discovery over a fixed, user-maintained list of servers.
///
/// # Example
///
/// ```
/// use tinyrpc_xclient::{Discovery, MultiServersDiscovery, SelectMode};
///
/// let discovery = MultiServersDiscovery::new(vec![
///     "tcp@127.0.0.1:9001".to_string(),
///     "tcp@127.0.0.1:9002".to_string(),
/// ]);
///
/// let first = discovery.get(SelectMode::RoundRobin).unwrap();
/// let second = discovery.get(SelectMode::RoundRobin).unwrap();
/// assert_ne!(first, second);
/// ```
pub struct MultiServersDiscovery {
    inner: Mutex<Servers>,
}

impl MultiServersDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        Self::with_rng(servers, StdRng::from_entropy())
    }

    /// Like [`new`](Self::new) with a fixed seed, for reproducible selection.
    pub fn with_seed(servers: Vec<String>, seed: u64) -> Self {
        Self::with_rng(servers, StdRng::seed_from_u64(seed))
    }

    fn with_rng(servers: Vec<String>, mut rng: StdRng) -> Self {
        // round robin starts at a random position
        let index = rng.gen_range(0..i32::MAX as usize - 1);
        Self {
            inner: Mutex::new(Servers {
                servers,
                index,
                rng,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Servers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Discovery for MultiServersDiscovery {
    /// The list only changes through [`update`](Discovery::update).
    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn update(&self, servers: Vec<String>) -> Result<()> {
        self.lock().servers = servers;
        Ok(())
    }

    fn get(&self, mode: SelectMode) -> Result<String> {
        let mut inner = self.lock();
        let n = inner.servers.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServers);
        }

        match mode {
            SelectMode::Random => {
                let i = inner.rng.gen_range(0..n);
                Ok(inner.servers[i].clone())
            }
            SelectMode::RoundRobin => {
                // the set may have shrunk since the last pick
                let server = inner.servers[inner.index % n].clone();
                inner.index = (inner.index + 1) % n;
                Ok(server)
            }
        }
    }

    fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.lock().servers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn servers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tcp@127.0.0.1:{}", 9000 + i)).collect()
    }

    #[test]
    fn test_empty_set() {
        let discovery = MultiServersDiscovery::new(Vec::new());
        assert_eq!(discovery.get(SelectMode::Random), Err(RpcError::NoAvailableServers));
        assert_eq!(
            discovery.get(SelectMode::RoundRobin),
            Err(RpcError::NoAvailableServers)
        );
        assert!(discovery.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_round_robin_visits_each_once_per_cycle() {
        let list = servers(4);
        let discovery = MultiServersDiscovery::new(list.clone());

        for _ in 0..3 {
            let cycle: HashSet<String> = (0..list.len())
                .map(|_| discovery.get(SelectMode::RoundRobin).unwrap())
                .collect();
            assert_eq!(cycle.len(), list.len());
        }
    }

    #[test]
    fn test_round_robin_order_is_stable() {
        let list = servers(3);
        let discovery = MultiServersDiscovery::with_seed(list.clone(), 7);

        let first: Vec<_> = (0..3).map(|_| discovery.get(SelectMode::RoundRobin).unwrap()).collect();
        let second: Vec<_> = (0..3).map(|_| discovery.get(SelectMode::RoundRobin).unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_random_stays_in_set() {
        let list = servers(3);
        let discovery = MultiServersDiscovery::new(list.clone());

        for _ in 0..50 {
            let picked = discovery.get(SelectMode::Random).unwrap();
            assert!(list.contains(&picked));
        }
    }

    #[test]
    fn test_update_shrinks_set() {
        let discovery = MultiServersDiscovery::new(servers(5));
        discovery.get(SelectMode::RoundRobin).unwrap();

        discovery.update(servers(1)).unwrap();
        discovery.refresh().unwrap();
        assert_eq!(discovery.get(SelectMode::RoundRobin).unwrap(), "tcp@127.0.0.1:9000");
        assert_eq!(discovery.get_all().unwrap(), servers(1));
    }

    #[test]
    fn test_unseeded_start_positions_differ() {
        let list = servers(64);
        let starts: HashSet<String> = (0..10)
            .map(|_| {
                MultiServersDiscovery::new(list.clone())
                    .get(SelectMode::RoundRobin)
                    .unwrap()
            })
            .collect();
        assert!(starts.len() > 1);
    }
}
