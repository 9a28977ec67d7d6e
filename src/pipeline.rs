//! The bidirectional processor pipeline described in spec.md §4.2.
//!
//! Each processor exposes four entry points (`c2s_from_outside`,
//! `c2s_from_inside`, `s2c_from_outside`, `s2c_from_inside`). Rather than
//! the original's closures-over-closures, each entry point returns the
//! `Action`s it wants to take, and `Pipeline::drive` dispatches them
//! through an explicit work queue — see SPEC_FULL.md §2 for why.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::errors::ProxyError;
use crate::framer::Message;

/// The unit of data flowing along an edge: raw bytes outside the parser,
/// parsed messages inside it.
#[derive(Debug, Clone)]
pub enum Carrier {
    Bytes(Bytes),
    Messages(Vec<Message>),
}

impl Carrier {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Carrier::Messages(m) => m,
            Carrier::Bytes(_) => {
                panic!("pipeline wiring error: expected Messages carrier, found Bytes")
            }
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Carrier::Bytes(b) => b,
            Carrier::Messages(_) => {
                panic!("pipeline wiring error: expected Bytes carrier, found Messages")
            }
        }
    }
}

/// Which logical stream a piece of data belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Whether an action targets the processor one step closer to the socket
/// (`Outer`) or one step closer to the innermost echo (`Inner`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Outer,
    Inner,
}

/// One unit of work a processor wants performed: send `data` in
/// `direction`, to the neighbour on `edge`.
pub struct Action {
    pub direction: Direction,
    pub edge: Edge,
    pub data: Carrier,
}

impl Action {
    pub fn to_inner(direction: Direction, data: Carrier) -> Self {
        Action { direction, edge: Edge::Inner, data }
    }

    pub fn to_outer(direction: Direction, data: Carrier) -> Self {
        Action { direction, edge: Edge::Outer, data }
    }
}

/// A single bidirectional pipeline stage.
pub trait Processor: Send {
    fn c2s_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError>;
    fn c2s_from_inside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError>;
    fn s2c_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError>;
    fn s2c_from_inside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError>;
}

/// What the connection supervisor should actually write to each socket
/// once a drive pass settles.
#[derive(Default)]
pub struct PipelineOutput {
    pub to_server: Vec<Bytes>,
    pub to_client: Vec<Bytes>,
}

/// An ordered chain of processors, outermost first. The pipeline itself
/// plays the role of the "edge socket adapter": data entering at index 0
/// comes straight from a socket read, and an action that targets the
/// outer edge of index 0 is a real write to one of the two sockets.
pub struct Pipeline {
    stages: Vec<Box<dyn Processor>>,
}

enum Entry {
    FromOutside,
    FromInside,
}

struct Work {
    index: usize,
    direction: Direction,
    entry: Entry,
    data: Carrier,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Processor>>) -> Self {
        Pipeline { stages }
    }

    /// Feed a raw read from the client socket into the outermost stage.
    pub fn c2s_from_outside(&mut self, data: Bytes) -> Result<PipelineOutput, ProxyError> {
        self.drive(Work {
            index: 0,
            direction: Direction::ClientToServer,
            entry: Entry::FromOutside,
            data: Carrier::Bytes(data),
        })
    }

    /// Feed a raw read from the server socket into the outermost stage.
    pub fn s2c_from_outside(&mut self, data: Bytes) -> Result<PipelineOutput, ProxyError> {
        self.drive(Work {
            index: 0,
            direction: Direction::ServerToClient,
            entry: Entry::FromOutside,
            data: Carrier::Bytes(data),
        })
    }

    fn drive(&mut self, seed: Work) -> Result<PipelineOutput, ProxyError> {
        let mut queue = VecDeque::new();
        queue.push_back(seed);

        let mut output = PipelineOutput::default();

        while let Some(work) = queue.pop_front() {
            let stage = self
                .stages
                .get_mut(work.index)
                .expect("pipeline wiring error: index out of range");

            let actions = match (work.direction, &work.entry) {
                (Direction::ClientToServer, Entry::FromOutside) => {
                    stage.c2s_from_outside(work.data)?
                }
                (Direction::ClientToServer, Entry::FromInside) => {
                    stage.c2s_from_inside(work.data)?
                }
                (Direction::ServerToClient, Entry::FromOutside) => {
                    stage.s2c_from_outside(work.data)?
                }
                (Direction::ServerToClient, Entry::FromInside) => {
                    stage.s2c_from_inside(work.data)?
                }
            };

            for action in actions {
                match action.edge {
                    Edge::Inner => {
                        queue.push_back(Work {
                            index: work.index + 1,
                            direction: action.direction,
                            entry: Entry::FromOutside,
                            data: action.data,
                        });
                    }
                    Edge::Outer => {
                        if work.index == 0 {
                            let bytes = action.data.into_bytes();
                            match action.direction {
                                Direction::ClientToServer => output.to_server.push(bytes),
                                Direction::ServerToClient => output.to_client.push(bytes),
                            }
                        } else {
                            queue.push_back(Work {
                                index: work.index - 1,
                                direction: action.direction,
                                entry: Entry::FromInside,
                                data: action.data,
                            });
                        }
                    }
                }
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A processor that just re-emits everything it sees, one layer in
    /// each direction, to exercise the action queue plumbing itself.
    struct PassThrough;

    impl Processor for PassThrough {
        fn c2s_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
            Ok(vec![Action::to_inner(Direction::ClientToServer, data)])
        }
        fn c2s_from_inside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
            Ok(vec![Action::to_outer(Direction::ClientToServer, data)])
        }
        fn s2c_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
            Ok(vec![Action::to_inner(Direction::ServerToClient, data)])
        }
        fn s2c_from_inside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
            Ok(vec![Action::to_outer(Direction::ServerToClient, data)])
        }
    }

    /// The innermost echo stage: bubble outer-bound data straight back out
    /// in the same direction it arrived, no-op on from_inside.
    struct Echo;

    impl Processor for Echo {
        fn c2s_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
            Ok(vec![Action::to_outer(Direction::ClientToServer, data)])
        }
        fn c2s_from_inside(&mut self, _data: Carrier) -> Result<Vec<Action>, ProxyError> {
            Ok(vec![])
        }
        fn s2c_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
            Ok(vec![Action::to_outer(Direction::ServerToClient, data)])
        }
        fn s2c_from_inside(&mut self, _data: Carrier) -> Result<Vec<Action>, ProxyError> {
            Ok(vec![])
        }
    }

    #[test]
    fn tunnels_bytes_through_to_the_edge_unchanged() {
        let mut pipeline = Pipeline::new(vec![Box::new(PassThrough), Box::new(Echo)]);

        let out = pipeline
            .c2s_from_outside(Bytes::from_static(b"hello"))
            .unwrap();
        assert_eq!(out.to_server, vec![Bytes::from_static(b"hello")]);
        assert!(out.to_client.is_empty());

        let out = pipeline
            .s2c_from_outside(Bytes::from_static(b"world"))
            .unwrap();
        assert_eq!(out.to_client, vec![Bytes::from_static(b"world")]);
        assert!(out.to_server.is_empty());
    }
}
