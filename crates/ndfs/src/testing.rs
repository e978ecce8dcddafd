//! Scripted in-process transport for unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    connect::Builder,
    meta::Handle,
    proto::*,
    transport::{Connector, NameNodeAddr, Transport},
    utils::Result,
};

#[derive(Default)]
pub struct Script {
    pub sent: Vec<Call>,
    pub replies: VecDeque<Result<Call>>,
}

/// Records every request and answers from a queue of replies.
#[derive(Clone, Default)]
pub struct MockTransport(pub Arc<Mutex<Script>>);

impl MockTransport {
    pub fn reply(&self, reply: Result<Call>) -> &Self {
        self.0.lock().unwrap().replies.push_back(reply);
        self
    }

    pub fn sent(&self) -> Vec<Call> {
        self.0.lock().unwrap().sent.clone()
    }

    pub fn last_sent(&self) -> Call {
        self.sent().pop().unwrap()
    }
}

impl Transport for MockTransport {
    fn call(&self, body: Call) -> Result<Call> {
        let mut script = self.0.lock().unwrap();
        script.sent.push(body);
        script
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(ndfs_err!(EIO, "no scripted reply")))
    }
}

#[derive(Default)]
pub struct MockConnector {
    pub transport: MockTransport,
    pub connects: AtomicUsize,
    pub last_addr: Mutex<Option<(NameNodeAddr, String)>>,
}

impl Connector for MockConnector {
    fn connect(&self, addr: &NameNodeAddr, user: &str) -> Result<Box<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_addr.lock().unwrap() = Some((addr.clone(), user.to_owned()));
        Ok(Box::new(self.transport.clone()))
    }
}

pub fn defaults_reply(block_size: u64) -> Result<Call> {
    Ok(Call::RGetServerDefaults {
        defaults: ServerDefaults {
            block_size,
            ..Default::default()
        },
    })
}

/// A handle connected to `hdfs://nn.example.com/` as `alice`, with the
/// server-defaults probe already answered.
pub fn handle() -> (Handle, MockTransport) {
    let connector = MockConnector::default();
    connector.transport.reply(defaults_reply(64 << 20));
    let fs = Handle::connect_with(
        Builder::new()
            .namenode("hdfs://nn.example.com/")
            .user("alice"),
        &connector,
    )
    .unwrap();
    let transport = connector.transport.clone();
    transport.0.lock().unwrap().sent.clear();
    (fs, transport)
}

pub fn status(file_type: FileType, name: &str) -> FileStatus {
    FileStatus {
        file_type,
        path: Data::from(name),
        length: 0,
        permission: 0o755,
        owner: "alice".to_owned(),
        group: "supergroup".to_owned(),
        modification_time: 1_000,
        access_time: 2_000,
        block_replication: None,
        blocksize: None,
    }
}
