use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use ed25519_dalek::VerifyingKey;
use tm_consensus::{consensus::messages::ConsensusMessage, networking::network::Network, types::validator_set::ValidatorSet};

/// A mock network stub which passes messages from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_verifying_key: VerifyingKey,
    all_peers: HashMap<VerifyingKey, Sender<(VerifyingKey, ConsensusMessage)>>,
    inbox: Arc<Mutex<Receiver<(VerifyingKey, ConsensusMessage)>>>,
}

impl Network for NetworkStub {
    fn init_validator_set(&mut self, _: ValidatorSet) {}

    fn update_validator_set(&mut self, _: ValidatorSet) {}

    fn send(&mut self, peer: VerifyingKey, message: ConsensusMessage) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_verifying_key, message));
        }
    }

    // The consensus core handles its own messages, so they are not sent back to it.
    fn broadcast(&mut self, message: ConsensusMessage) {
        for (verifying_key, peer) in &self.all_peers {
            if *verifying_key != self.my_verifying_key {
                let _ = peer.send((self.my_verifying_key, message.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(VerifyingKey, ConsensusMessage)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(VerifyingKey, Receiver<(VerifyingKey, ConsensusMessage)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_verifying_key, inbox)| NetworkStub {
            my_verifying_key,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
