//! Control channel to the game mod: input and reset commands over UDP.

use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use relay_proto::{Action, GameCommand};
use tracing::trace;

use crate::error::BindError;

/// Sends commands to the game mod. Replies go to whatever address the
/// socket is bound to, so a link made from a receiver socket (see
/// [`DatagramReceiver::game_link`](crate::receiver::DatagramReceiver::game_link))
/// gets them back through the receive loop. A link from [`GameLink::connect`]
/// is fire-and-forget.
pub struct GameLink {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl GameLink {
    /// Bind an ephemeral local port and send everything to `target`.
    pub fn connect(target: &str) -> Result<Self, BindError> {
        let peer = resolve(target)?;
        let local = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).map_err(|err| BindError::bind(local, err))?;
        Ok(Self { socket, peer })
    }

    /// Send to `target` from an already bound socket.
    pub fn from_socket(socket: UdpSocket, target: &str) -> Result<Self, BindError> {
        Ok(Self {
            socket,
            peer: resolve(target)?,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn send(&self, command: &GameCommand) -> io::Result<usize> {
        let sent = self.socket.send_to(&command.to_bytes(), self.peer)?;
        trace!(target: "relay::game", peer = %self.peer, bytes = sent, "game command sent");
        Ok(sent)
    }

    /// Actions missing from `input` are left as the game last saw them.
    pub fn send_input(&self, input: BTreeMap<Action, bool>) -> io::Result<usize> {
        self.send(&GameCommand::Input(input))
    }

    pub fn reset(&self) -> io::Result<usize> {
        self.send(&GameCommand::Reset)
    }

    pub fn request_state(&self) -> io::Result<usize> {
        self.send(&GameCommand::GetState)
    }
}

fn resolve(target: &str) -> Result<SocketAddr, BindError> {
    target
        .to_socket_addrs()
        .map_err(|err| BindError::prepare(target, err))?
        .next()
        .ok_or_else(|| {
            BindError::prepare(
                target,
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn game_socket() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind game");
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("timeout");
        socket
    }

    fn recv_json(socket: &UdpSocket) -> Value {
        let mut buf = [0u8; 1024];
        let len = socket.recv(&mut buf).expect("recv");
        serde_json::from_slice(&buf[..len]).expect("json")
    }

    #[test_timeout::timeout(5)]
    fn commands_reach_the_game() {
        let game = game_socket();
        let link = GameLink::connect(&game.local_addr().unwrap().to_string()).expect("connect");

        link.send_input(BTreeMap::from([(Action::Jump, true), (Action::Left, false)]))
            .expect("input");
        assert_eq!(recv_json(&game), json!({"jump": true, "left": false}));

        link.reset().expect("reset");
        assert_eq!(recv_json(&game), json!({"type": "reset"}));

        link.request_state().expect("get_state");
        assert_eq!(recv_json(&game), json!({"type": "get_state"}));
    }

    #[test_timeout::timeout(5)]
    fn commands_leave_from_the_given_socket() {
        let game = game_socket();
        let own = UdpSocket::bind("127.0.0.1:0").expect("bind own");
        let own_addr = own.local_addr().unwrap();
        let link = GameLink::from_socket(own, &game.local_addr().unwrap().to_string())
            .expect("link");
        assert_eq!(link.local_addr().unwrap(), own_addr);

        link.reset().expect("reset");
        let mut buf = [0u8; 64];
        let (_, from) = game.recv_from(&mut buf).expect("recv");
        assert_eq!(from, own_addr);
    }

    #[test]
    fn unresolvable_target_is_a_prepare_error() {
        let err = GameLink::connect("not an address").err().expect("should fail");
        assert!(matches!(err, BindError::Prepare { .. }));
    }
}
