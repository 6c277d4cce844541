//! In-memory network/sink harness for driving a group of [`shuffle_core::Round`]s
//! against each other without any real transport
//!
//! Mirrors how the teacher protocol's own test crate drives a group of
//! parties through a `round_based` simulation, except here delivery is
//! explicit (`spec.md` §5 rules out an implicit event loop): [`ChannelNetwork`]
//! just queues bytes, and [`drain_mailbox`] drains the queue in FIFO order
//! until it's empty or a step budget is exhausted.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use generic_ec::Curve;
use group::{Group, Local, MemberId, MemberInfo, Valid, Validate};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shuffle_core::{Round, RoundConfig, Status};

/// One pending wire message: `(from, to, bytes)`
pub type Queued = (u16, u16, Vec<u8>);

/// The [`MemberId`] [`build_parties`]/[`build_parties_with_keys`] assign to
/// member index `i`, so a scenario test can check which member ended up in
/// an accused [`shuffle_core::Status::Aborted`] set without reaching into
/// the harness's group construction itself.
pub fn member_id_for(i: u16) -> MemberId {
    let mut seed = [0u8; 32];
    seed[0..2].copy_from_slice(&i.to_be_bytes());
    MemberId::from_bytes(seed)
}

/// Shared mailbox every party's [`Network`] impl pushes into
#[derive(Default)]
pub struct Mailbox {
    queue: VecDeque<Queued>,
}

impl Mailbox {
    /// Copies every currently queued message without draining it
    pub fn queue_snapshot(&self) -> Vec<Queued> {
        self.queue.iter().cloned().collect()
    }

    /// Pops the oldest queued message, if any — lets a test intercept or
    /// substitute a message before it reaches its recipient
    pub fn pop_front(&mut self) -> Option<Queued> {
        self.queue.pop_front()
    }
}

/// A [`shuffle_core::round::Network`] that enqueues into a shared [`Mailbox`]
/// instead of touching a real transport
pub struct ChannelNetwork {
    from: u16,
    group_size: u16,
    mailbox: Rc<RefCell<Mailbox>>,
}

impl shuffle_core::Network for ChannelNetwork {
    fn send(&mut self, to: u16, bytes: Vec<u8>) {
        self.mailbox.borrow_mut().queue.push_back((self.from, to, bytes));
    }

    fn broadcast(&mut self, bytes: Vec<u8>) {
        for to in 0..self.group_size {
            if to != self.from {
                self.mailbox
                    .borrow_mut()
                    .queue
                    .push_back((self.from, to, bytes.clone()));
            }
        }
    }
}

/// A [`shuffle_core::round::Sink`] that just records whatever it's given
#[derive(Default, Clone)]
pub struct RecordingSink {
    pub delivered: Rc<RefCell<Option<Vec<Vec<u8>>>>>,
}

impl shuffle_core::round::Sink for RecordingSink {
    fn deliver(&mut self, payloads: Vec<Vec<u8>>) {
        *self.delivered.borrow_mut() = Some(payloads);
    }
}

/// One party's key material plus the [`Round`] it drives
pub struct Party<E: Curve> {
    pub round: Round<E, ChannelNetwork, RecordingSink, StdRng>,
    pub sink: RecordingSink,
}

/// Builds a [`Group`] of `n` members with the first `shufflers` of them
/// acting as shufflers, plus a fresh keypair-backed [`Party`] per member
/// wired into a shared [`Mailbox`]
pub fn build_parties<E: Curve>(
    payloads: Vec<Vec<u8>>,
    shufflers: Vec<u16>,
    round_id: [u8; 32],
    phase_timeout: Duration,
) -> (Vec<Party<E>>, Rc<RefCell<Mailbox>>)
where
    E: Curve,
{
    let n = payloads.len();
    build_parties_with_keys(payloads, shufflers, round_id, phase_timeout, vec![None; n])
}

/// Like [`build_parties`], but lets the caller pin specific members' outer
/// secret key ahead of time (one slot per payload, `None` to generate
/// normally) — needed by tests that forge a signed message on a member's
/// behalf, since [`Round`] never exposes the key it generated internally.
pub fn build_parties_with_keys<E: Curve>(
    payloads: Vec<Vec<u8>>,
    shufflers: Vec<u16>,
    round_id: [u8; 32],
    phase_timeout: Duration,
    injected_outer_keys: Vec<Option<generic_ec::NonZero<generic_ec::SecretScalar<E>>>>,
) -> (Vec<Party<E>>, Rc<RefCell<Mailbox>>)
where
    E: Curve,
{
    let n = payloads.len() as u16;
    let mailbox = Rc::new(RefCell::new(Mailbox::default()));
    let mut rngs: Vec<StdRng> = (0..n).map(|i| StdRng::seed_from_u64(u64::from(i) + 1)).collect();

    // Placeholder group: the real per-round public keys aren't known until
    // `Round::start` broadcasts them, so the roster here only needs to
    // supply identity and order (`spec.md` §6's Group interface).
    let members: Vec<MemberInfo<E>> = (0..n)
        .map(|i| {
            let id = member_id_for(i);
            let dummy = generic_ec::Point::<E>::generator();
            MemberInfo::new(id, dummy, dummy)
        })
        .collect();
    let group: Valid<Group<E>> = Group::new(members, shufflers)
        .expect("valid test group")
        .validate()
        .expect("valid test group");

    let mut parties = Vec::with_capacity(n as usize);
    for ((i, payload), injected_key) in payloads.into_iter().enumerate().zip(injected_outer_keys) {
        let local = Local { index: i as u16 };
        let mut config = RoundConfig::new(round_id, phase_timeout);
        config.injected_outer_key = injected_key;
        let network = ChannelNetwork {
            from: i as u16,
            group_size: n,
            mailbox: mailbox.clone(),
        };
        let sink = RecordingSink::default();
        let rng = rngs.remove(0);
        let round = Round::new(group.clone(), local, payload, config, network, sink.clone(), rng);
        parties.push(Party { round, sink });
    }
    (parties, mailbox)
}

/// Drains `mailbox` into every party's `deliver`, repeating until quiescent
/// or `max_steps` messages have been processed
pub fn drain_mailbox<E: Curve>(parties: &mut [Party<E>], mailbox: &Rc<RefCell<Mailbox>>, max_steps: usize)
where
{
    let mut steps = 0;
    loop {
        let next = mailbox.borrow_mut().queue.pop_front();
        let Some((from, to, bytes)) = next else { break };
        if steps >= max_steps {
            break;
        }
        steps += 1;
        let party = &mut parties[usize::from(to)];
        party.round.deliver(&bytes, from).ok();
    }
}

/// Calls [`Round::start`] on every party, in index order
pub fn start_all<E: Curve>(parties: &mut [Party<E>])
where
{
    for party in parties.iter_mut() {
        party.round.start().ok();
    }
}

/// Advances every party's timeout clock to `now`
pub fn tick_all<E: Curve>(parties: &mut [Party<E>], now: Duration)
where
{
    for party in parties.iter_mut() {
        party.round.tick(now).ok();
    }
}

/// Snapshots every party's current [`Status`]
pub fn statuses<E: Curve>(parties: &[Party<E>]) -> Vec<Status>
where
{
    parties.iter().map(|p| p.round.status()).collect()
}

/// `start`, drain to quiescence, then repeatedly advance the clock and drain
/// again: a timeout-driven transition (a dropped message) only fires once a
/// party's deadline — lazily pinned to the first `tick` it observes in a
/// phase — has been passed, and a round can pass through several timed
/// phases (e.g. a stalled key-sharing phase falling into Blame, which then
/// has its own timeout) before reaching a terminal status.
pub fn run_to_completion<E: Curve>(
    parties: &mut [Party<E>],
    mailbox: &Rc<RefCell<Mailbox>>,
    phase_timeout: Duration,
    max_steps: usize,
) where
{
    start_all(parties);
    drain_mailbox(parties, mailbox, max_steps);

    let mut now = Duration::ZERO;
    for _ in 0..8 {
        now += phase_timeout * 2 + Duration::from_secs(1);
        tick_all(parties, now);
        drain_mailbox(parties, mailbox, max_steps);
    }
}
