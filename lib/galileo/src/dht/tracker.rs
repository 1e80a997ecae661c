use crate::net::shared::{ConnectionId, Destination};
use hashbrown::HashMap;
use orbit::logging;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default per-query deadline.
pub const DEFAULT_QUERY_DEADLINE: Duration = Duration::from_secs(30);

/// Correlation state for one in-flight fan-out query.
#[derive(Debug)]
pub struct QueryTracker {
    /// The connection the originating client is waiting on.
    pub origin: ConnectionId,
    /// Peers the query was forwarded to.
    pub expected: Vec<Destination>,
    /// Peers that have responded so far; duplicates are kept.
    pub responded: Vec<Destination>,
    /// Accumulated response payloads, opaque to the table.
    pub responses: Vec<Vec<u8>>,
    opened: Instant,
}

impl QueryTracker {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.responded.len() >= self.expected.len()
    }

    #[inline]
    pub fn missing(&self) -> usize {
        self.expected.len().saturating_sub(self.responded.len())
    }
}

/// Table correlating outstanding client queries with the peer responses they
/// expect. Query ids are `session:counter` strings; the session component
/// derives deterministically from the node's listen port, which keeps ids
/// unique across the cluster without coordination.
pub struct TrackerTable {
    session: String,
    counter: AtomicU64,
    deadline: Duration,
    trackers: Mutex<HashMap<String, QueryTracker>>,
    log: logging::Logger,
}

impl TrackerTable {
    pub fn new(port: u16, deadline: Duration, log: &logging::Logger) -> TrackerTable {
        TrackerTable {
            session: format!("s{}", port),
            counter: AtomicU64::new(0),
            deadline,
            trackers: Mutex::new(HashMap::new()),
            log: log.new(logging::o!()),
        }
    }

    #[inline]
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Atomically generates the next query id and inserts a tracker bound to
    /// the originating connection.
    pub fn open(&self, origin: ConnectionId, expected: Vec<Destination>) -> String {
        let query_id = format!(
            "{}:{}",
            self.session,
            self.counter.fetch_add(1, Ordering::Relaxed)
        );

        let tracker = QueryTracker {
            origin,
            expected,
            responded: Vec::new(),
            responses: Vec::new(),
            opened: Instant::now(),
        };

        logging::debug!(self.log, "query tracker opened";
                        "query_id" => &query_id,
                        "expected" => tracker.expected.len());

        self.trackers
            .lock()
            .expect("Lock poisoned")
            .insert(query_id.clone(), tracker);

        query_id
    }

    /// Marks the peer as responded and appends the payload. Returns whether
    /// the tracker is now complete, plus the originating connection; `None`
    /// for an unknown id, which the caller reports as a late response.
    pub fn record(
        &self,
        query_id: &str,
        peer: &Destination,
        response: &[u8],
    ) -> Option<(bool, ConnectionId)> {
        let mut trackers = self.trackers.lock().expect("Lock poisoned");
        let tracker = trackers.get_mut(query_id)?;

        tracker.responded.push(peer.clone());
        tracker.responses.push(response.to_vec());

        Some((tracker.is_complete(), tracker.origin))
    }

    /// Removes and returns the tracker. Called on completion or deadline.
    pub fn close(&self, query_id: &str) -> Option<QueryTracker> {
        self.trackers
            .lock()
            .expect("Lock poisoned")
            .remove(query_id)
    }

    /// Removes and returns every tracker whose deadline has passed.
    pub fn expire(&self, now: Instant) -> Vec<(String, QueryTracker)> {
        let mut trackers = self.trackers.lock().expect("Lock poisoned");

        let expired: Vec<String> = trackers
            .iter()
            .filter(|(_, tracker)| now.duration_since(tracker.opened) >= self.deadline)
            .map(|(query_id, _)| query_id.clone())
            .collect();

        expired
            .into_iter()
            .map(|query_id| {
                let tracker = trackers.remove(&query_id).expect("Tracker must exist");
                (query_id, tracker)
            })
            .collect()
    }

    /// Number of in-flight queries.
    pub fn pending(&self) -> usize {
        self.trackers.lock().expect("Lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::shared::Side;
    use std::thread;

    fn origin(token: usize) -> ConnectionId {
        ConnectionId {
            side: Side::Server,
            token,
        }
    }

    fn peers(count: usize) -> Vec<Destination> {
        (0..count)
            .map(|index| Destination::new("peer", 5000 + index as u16))
            .collect()
    }

    fn table(deadline: Duration) -> TrackerTable {
        TrackerTable::new(5555, deadline, &logging::discard())
    }

    #[test]
    fn test_session_derives_from_port() {
        let table = table(DEFAULT_QUERY_DEADLINE);

        assert_eq!(table.session(), "s5555");
        assert_eq!(table.open(origin(2), peers(1)), "s5555:0");
        assert_eq!(table.open(origin(2), peers(1)), "s5555:1");
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let table = std::sync::Arc::new(table(DEFAULT_QUERY_DEADLINE));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = std::sync::Arc::clone(&table);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| table.open(origin(2), Vec::new()))
                        .collect::<Vec<String>>()
                })
            })
            .collect();

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();

        let total = all.len();
        all.sort();
        all.dedup();

        assert_eq!(all.len(), total);
    }

    #[test]
    fn test_record_until_complete() {
        let table = table(DEFAULT_QUERY_DEADLINE);
        let expected = peers(3);
        let query_id = table.open(origin(4), expected.clone());

        let (done, conn) = table.record(&query_id, &expected[2], b"r2").unwrap();
        assert!(!done);
        assert_eq!(conn, origin(4));

        let (done, _) = table.record(&query_id, &expected[0], b"r0").unwrap();
        assert!(!done);

        let (done, _) = table.record(&query_id, &expected[1], b"r1").unwrap();
        assert!(done);

        let tracker = table.close(&query_id).unwrap();
        assert_eq!(tracker.responses.len(), 3);
        assert_eq!(tracker.responses[0], b"r2".to_vec());
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn test_record_unknown_id() {
        let table = table(DEFAULT_QUERY_DEADLINE);

        assert_eq!(table.record("s9999:17", &peers(1)[0], b"late"), None);
    }

    #[test]
    fn test_duplicate_responses_kept() {
        let table = table(DEFAULT_QUERY_DEADLINE);
        let expected = peers(2);
        let query_id = table.open(origin(4), expected.clone());

        table.record(&query_id, &expected[0], b"a").unwrap();
        let (done, _) = table.record(&query_id, &expected[0], b"a-again").unwrap();

        // Completion counts responses, not distinct peers
        assert!(done);

        let tracker = table.close(&query_id).unwrap();
        assert_eq!(tracker.responded.len(), 2);
        assert_eq!(tracker.missing(), 0);
    }

    #[test]
    fn test_expire_removes_only_overdue() {
        let table = table(Duration::from_millis(20));

        let stale = table.open(origin(2), peers(1));
        thread::sleep(Duration::from_millis(40));
        let fresh = table.open(origin(2), peers(1));

        let expired = table.expire(Instant::now());

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, stale);
        assert_eq!(table.pending(), 1);
        assert!(table.close(&fresh).is_some());
    }

    #[test]
    fn test_close_is_idempotent() {
        let table = table(DEFAULT_QUERY_DEADLINE);
        let query_id = table.open(origin(2), peers(1));

        assert!(table.close(&query_id).is_some());
        assert!(table.close(&query_id).is_none());
    }
}
