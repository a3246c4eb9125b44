use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use visual::{ViewerId, sequence_greater_than};

#[derive(Debug)]
pub struct ViewerConnection {
    pub addr: SocketAddr,
    pub viewer_id: ViewerId,
    pub name: String,
    pub world: u32,
    pub rtt_ms: Option<u32>,
    pub last_receive_time: Instant,
    last_sequence: Option<u32>,
}

impl ViewerConnection {
    pub fn new(addr: SocketAddr, viewer_id: ViewerId, name: String, world: u32) -> Self {
        Self {
            addr,
            viewer_id,
            name,
            world,
            rtt_ms: None,
            last_receive_time: Instant::now(),
            last_sequence: None,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    /// Accepts `sequence` if it is newer than everything seen so far.
    /// Reordered or duplicated datagrams are refused.
    pub fn accept_sequence(&mut self, sequence: u32) -> bool {
        match self.last_sequence {
            Some(last) if !sequence_greater_than(sequence, last) => false,
            _ => {
                self.last_sequence = Some(sequence);
                true
            }
        }
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    viewers_by_addr: HashMap<SocketAddr, ViewerId>,
    viewers: HashMap<ViewerId, ViewerConnection>,
    next_viewer_id: ViewerId,
    max_viewers: usize,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_viewers: usize, timeout: Duration) -> Self {
        Self {
            viewers_by_addr: HashMap::new(),
            viewers: HashMap::new(),
            next_viewer_id: 1,
            max_viewers,
            timeout,
        }
    }

    /// Registers a new viewer for `addr`. Returns the existing one if the
    /// address already said hello.
    pub fn get_or_create(
        &mut self,
        addr: SocketAddr,
        name: &str,
        world: u32,
    ) -> Result<(&mut ViewerConnection, bool), &'static str> {
        let viewer_id = match self.viewers_by_addr.get(&addr) {
            Some(&id) => id,
            None => {
                if self.viewers.len() >= self.max_viewers {
                    return Err("Server full");
                }
                let id = self.next_viewer_id;
                self.next_viewer_id += 1;
                self.viewers_by_addr.insert(addr, id);
                id
            }
        };

        match self.viewers.entry(viewer_id) {
            Entry::Occupied(entry) => Ok((entry.into_mut(), false)),
            Entry::Vacant(entry) => Ok((
                entry.insert(ViewerConnection::new(addr, viewer_id, name.to_owned(), world)),
                true,
            )),
        }
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut ViewerConnection> {
        let id = self.viewers_by_addr.get(addr)?;
        self.viewers.get_mut(id)
    }

    pub fn remove(&mut self, viewer_id: ViewerId) -> Option<ViewerConnection> {
        let connection = self.viewers.remove(&viewer_id)?;
        self.viewers_by_addr.remove(&connection.addr);
        Some(connection)
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<ViewerConnection> {
        let viewer_id = self.viewers_by_addr.remove(addr)?;
        self.viewers.remove(&viewer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewerConnection> {
        self.viewers.values()
    }

    pub fn cleanup_timed_out(&mut self) -> Vec<ViewerConnection> {
        let timed_out: Vec<ViewerId> = self
            .viewers
            .iter()
            .filter(|(_, c)| c.is_timed_out(self.timeout))
            .map(|(&id, _)| id)
            .collect();

        timed_out.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    pub fn max_viewers(&self) -> usize {
        self.max_viewers
    }
}
