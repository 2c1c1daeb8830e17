use crate::NodeId;
use std::{
    cmp::Ordering,
    collections::HashMap,
    fmt, fs, io,
    net::SocketAddr,
    path::Path,
};
use thiserror::Error;

/// Configuration holds the state of the membership of the cluster.
///
/// The membership is fixed at startup. Changing it requires restarting
/// the node.
#[derive(Clone)]
pub struct Configuration {
    current: NodeId,
    members: HashMap<NodeId, SocketAddr>,
}

impl Configuration {
    /// Creates a new configuration from the full membership, including the
    /// current node.
    pub fn new<I>(current: NodeId, members: I) -> Configuration
    where
        I: IntoIterator<Item = (NodeId, SocketAddr)>,
    {
        Configuration {
            current,
            members: members.into_iter().collect(),
        }
    }

    /// Loads the membership from a configuration file.
    ///
    /// The file lists one member per line as `memberId,host,port`. Member ids
    /// may carry an alphabetic tag (`M4`). Lines starting with `#` and blank
    /// lines are skipped.
    pub fn from_file<P: AsRef<Path>>(current: NodeId, path: P) -> Result<Configuration, ConfigError> {
        Configuration::parse(current, &fs::read_to_string(path)?)
    }

    /// Parses membership from configuration file contents.
    pub fn parse(current: NodeId, contents: &str) -> Result<Configuration, ConfigError> {
        let mut members = HashMap::new();
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split(',').map(str::trim);
            let entry = (fields.next(), fields.next(), fields.next(), fields.next());
            let (member, host, port) = match entry {
                (Some(member), Some(host), Some(port), None) => (member, host, port),
                _ => return Err(ConfigError::InvalidLine(idx + 1, line.to_string())),
            };

            let member = parse_member_id(member)
                .ok_or_else(|| ConfigError::InvalidMemberId(member.to_string()))?;
            let addr = format!("{}:{}", host, port)
                .parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidAddress(member, line.to_string()))?;

            if members.insert(member, addr).is_some() {
                return Err(ConfigError::DuplicateMember(member));
            }
        }

        if members.is_empty() {
            return Err(ConfigError::EmptyMembership);
        }

        Ok(Configuration { current, members })
    }

    /// Size of the majority quorum. The count includes the current node.
    pub fn quorum_size(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// Total number of members in the deployment.
    pub fn cluster_size(&self) -> usize {
        self.members.len()
    }

    /// Current node identifier
    pub fn current(&self) -> NodeId {
        self.current
    }

    /// Iterator containing `NodeId` values of peers (excludes the current node)
    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        let current = self.current;
        self.members.keys().cloned().filter(move |n| *n != current)
    }

    /// Gets all addresses contained in the configuration
    pub fn addresses(&self) -> impl Iterator<Item = (NodeId, SocketAddr)> + '_ {
        self.members.iter().map(|(node, addr)| (*node, *addr))
    }

    /// Address of a member, if known.
    pub fn address(&self, node: NodeId) -> Option<SocketAddr> {
        self.members.get(&node).cloned()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Configuration")
            .field("current_node_id", &self.current)
            .field("members", &self.members)
            .field("quorum", &self.quorum_size())
            .finish()
    }
}

/// Error raised while loading the membership file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading configuration")]
    Io(#[from] io::Error),
    #[error("invalid configuration line {0}: {1:?}")]
    InvalidLine(usize, String),
    #[error("invalid member id {0:?}")]
    InvalidMemberId(String),
    #[error("invalid address for member {0}: {1:?}")]
    InvalidAddress(NodeId, String),
    #[error("member {0} listed more than once")]
    DuplicateMember(NodeId),
    #[error("configuration lists no members")]
    EmptyMembership,
}

/// Parses a member identifier, tolerating an alphabetic tag prefix
/// (`M4` and `4` both name node 4).
pub(crate) fn parse_member_id(s: &str) -> Option<NodeId> {
    let digits = s.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    if digits.is_empty() {
        return None;
    }
    digits.parse::<NodeId>().ok()
}

/// `QuorumSet` tracks nodes that have sent certain messages and will
/// detect when quorum is reached. Duplicates are treated as a single
/// message to determine quorum.
///
/// Once the `QuorumSet` has quorum, additional nodes will not be added.
/// The purpose of the datastructure is to track _when_ quorum is
/// reached rather than being a general purpose set.
#[derive(Clone, Debug)]
pub struct QuorumSet {
    // Instead of using a HashSet or Vec, which may allocate more
    // than once, the QuorumSet has a specific size as a sized slice.
    // The datastructure ensures that the node IDs are stored in
    // sorted order.
    //
    // Quorums are typically small (2-5 nodes) so a smaller
    // data structure that isn't fancy is appropriate both
    // from a run time perspective and space perspective.
    values: Box<[Option<NodeId>]>,
}

impl QuorumSet {
    /// Creates a QuorumSet with a given size for quorum.
    pub fn with_size(size: usize) -> QuorumSet {
        assert!(size > 0);
        QuorumSet {
            values: vec![None; size].into_boxed_slice(),
        }
    }

    /// Size of the quorum
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Flag indicating whether quorum has been reached.
    pub fn has_quorum(&self) -> bool {
        let s = &self.values;
        assert!(!s.is_empty());
        s[s.len() - 1].is_some()
    }

    #[inline]
    fn binary_search(&self, n: NodeId) -> Result<usize, usize> {
        self.values.binary_search_by(move |v| match *v {
            Some(v) => v.cmp(&n),
            None => Ordering::Greater,
        })
    }

    /// Inserts a node into the set
    pub fn insert(&mut self, n: NodeId) {
        if self.has_quorum() {
            return;
        }

        let loc = self.binary_search(n);
        if let Err(loc) = loc {
            // if theres an existing occupant, then move
            // all the values over to the right to make
            // a hole for the new value in the correct
            // place
            if self.values[loc].is_some() {
                let len = self.values.len();
                for i in (loc..len - 1).rev() {
                    self.values.swap(i, i + 1);
                }
            }

            self.values[loc] = Some(n);
        }
    }

    /// Flag indicating whether the set contains a given node
    pub fn contains(&self, n: NodeId) -> bool {
        self.binary_search(n).is_ok()
    }

    /// Flag indicating whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.values[0].is_none()
    }
}
