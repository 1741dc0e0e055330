use std::time::Duration;

use tokio::sync::mpsc;

use super::*;
use crate::media::{MediaTrack, TrackKind};
use crate::peer::LoopbackConnector;

struct Side {
    neg: Negotiator,
    transport_rx: mpsc::Receiver<TransportEvent>,
    events: Vec<SessionEvent>,
}

fn side_with(local: &str, config: NegotiatorConfig) -> Side {
    let (tx, transport_rx) = mpsc::channel(64);
    let id = ParticipantId::from(local);
    let registry = PeerRegistry::new(Arc::new(LoopbackConnector::new(id.clone())), tx);
    let mut neg = Negotiator::new(id, config, registry);
    neg.set_local_stream(MediaStream::new(vec![
        MediaTrack::new(TrackKind::Audio, "mic"),
        MediaTrack::new(TrackKind::Video, "cam"),
    ]));
    Side {
        neg,
        transport_rx,
        events: Vec::new(),
    }
}

fn side(local: &str) -> Side {
    side_with(local, NegotiatorConfig::default())
}

fn observer(local: &str) -> Side {
    side_with(
        local,
        NegotiatorConfig {
            initiator: InitiatorPolicy::Observer,
            ..Default::default()
        },
    )
}

fn id(s: &str) -> ParticipantId {
    ParticipantId::from(s)
}

/// Shuttle signals and transport events between two sides until quiet.
async fn settle(a: &mut Side, b: &mut Side, mut to_b: Vec<SignalMessage>, mut to_a: Vec<SignalMessage>) {
    for _ in 0..64 {
        tokio::task::yield_now().await;
        let mut out_a = Outbox::default();
        let mut out_b = Outbox::default();
        for msg in to_a.drain(..) {
            a.neg.on_signal(msg, &mut out_a).await;
        }
        for msg in to_b.drain(..) {
            b.neg.on_signal(msg, &mut out_b).await;
        }
        while let Ok(ev) = a.transport_rx.try_recv() {
            a.neg.on_transport_event(ev, &mut out_a).await;
        }
        while let Ok(ev) = b.transport_rx.try_recv() {
            b.neg.on_transport_event(ev, &mut out_b).await;
        }
        to_b.extend(out_a.signals);
        to_a.extend(out_b.signals);
        a.events.extend(out_a.events);
        b.events.extend(out_b.events);
    }
}

fn connected_events(side: &Side) -> usize {
    side.events
        .iter()
        .filter(|e| matches!(e, SessionEvent::PeerConnected(_)))
        .count()
}

#[tokio::test]
async fn lower_id_offers_on_join() {
    let mut a = side("alice");
    let mut out = Outbox::default();
    a.neg.on_presence_join(id("bob"), &mut out).await;

    assert_eq!(out.signals.len(), 1);
    match &out.signals[0] {
        SignalMessage::Offer { target, from, .. } => {
            assert_eq!(target, &id("bob"));
            assert_eq!(from, &id("alice"));
        }
        other => panic!("expected offer, got {other:?}"),
    }
    assert_eq!(a.neg.states()[&id("bob")], NegotiationState::OfferSent);
}

#[tokio::test]
async fn higher_id_waits_for_offer() {
    let mut b = side("bob");
    let mut out = Outbox::default();
    b.neg.on_presence_join(id("alice"), &mut out).await;
    assert!(out.is_empty());
    assert!(b.neg.registry().is_empty());
    assert_eq!(b.neg.present().count(), 1);
}

#[tokio::test]
async fn sync_offers_only_to_higher_ids() {
    let mut m = side("m");
    let mut out = Outbox::default();
    m.neg
        .on_presence_sync(vec![id("a"), id("m"), id("x"), id("z")], &mut out)
        .await;
    let targets: Vec<&ParticipantId> = out.signals.iter().filter_map(|s| s.target()).collect();
    assert_eq!(targets, vec![&id("x"), &id("z")]);
    assert_eq!(m.neg.registry().len(), 2);
    assert_eq!(m.neg.present().count(), 3);
}

#[tokio::test]
async fn observer_policy_offers_only_to_later_joins() {
    let mut z = observer("z");
    let mut out = Outbox::default();
    z.neg.on_presence_sync(vec![id("a")], &mut out).await;
    assert!(out.is_empty());

    z.neg.on_presence_join(id("b"), &mut out).await;
    assert_eq!(out.signals.len(), 1);
    assert_eq!(out.signals[0].target(), Some(&id("b")));
}

#[tokio::test]
async fn full_exchange_connects_both_sides() {
    let mut a = side("alice");
    let mut b = side("bob");
    let mut out = Outbox::default();
    a.neg.on_presence_join(id("bob"), &mut out).await;

    settle(&mut a, &mut b, out.signals, Vec::new()).await;

    assert_eq!(a.neg.states()[&id("bob")], NegotiationState::Connected);
    assert_eq!(b.neg.states()[&id("alice")], NegotiationState::Connected);
    assert_eq!(connected_events(&a), 1);
    assert_eq!(connected_events(&b), 1);
    for s in [&a, &b] {
        let streams: Vec<&MediaStream> = s
            .events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::RemoteStream { stream, .. } => Some(stream),
                _ => None,
            })
            .collect();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].tracks.len(), 2);
    }
}

#[tokio::test]
async fn foreign_target_changes_nothing() {
    let mut b = side("bob");
    let mut out = Outbox::default();
    let msg = SignalMessage::Offer {
        target: id("carol"),
        from: id("alice"),
        description: SessionDescription::offer("loopback:offer:alice:audio"),
    };
    b.neg.on_signal(msg, &mut out).await;
    let msg = SignalMessage::Candidate {
        target: id("carol"),
        from: id("alice"),
        candidate: IceCandidate::new("candidate:1"),
    };
    b.neg.on_signal(msg, &mut out).await;

    assert!(out.is_empty());
    assert!(b.neg.registry().is_empty());
    assert_eq!(b.neg.buffered_candidates(), 0);
}

#[tokio::test]
async fn offer_from_unknown_peer_is_answered() {
    let mut b = side("bob");
    let mut out = Outbox::default();
    b.neg
        .on_signal(
            SignalMessage::Offer {
                target: id("bob"),
                from: id("alice"),
                description: SessionDescription::offer("loopback:offer:alice:audio"),
            },
            &mut out,
        )
        .await;

    assert_eq!(b.neg.states()[&id("alice")], NegotiationState::AnswerSent);
    assert!(matches!(
        &out.signals[..],
        [SignalMessage::Answer { target, .. }] if *target == id("alice")
    ));

    // A second offer before connecting is answered on a fresh link.
    let link = b.neg.registry().get(&id("alice")).unwrap().id;
    let mut again = Outbox::default();
    b.neg
        .on_signal(
            SignalMessage::Offer {
                target: id("bob"),
                from: id("alice"),
                description: SessionDescription::offer("loopback:offer:alice:audio"),
            },
            &mut again,
        )
        .await;
    assert_eq!(b.neg.registry().len(), 1);
    assert_ne!(b.neg.registry().get(&id("alice")).unwrap().id, link);
    assert_eq!(again.signals.len(), 1);
}

#[tokio::test]
async fn offer_on_connected_link_reuses_it() {
    let mut a = side("alice");
    let mut b = side("bob");
    let mut out = Outbox::default();
    a.neg.on_presence_join(id("bob"), &mut out).await;
    settle(&mut a, &mut b, out.signals, Vec::new()).await;
    let link = b.neg.registry().get(&id("alice")).unwrap().id;

    let mut again = Outbox::default();
    b.neg
        .on_signal(
            SignalMessage::Offer {
                target: id("bob"),
                from: id("alice"),
                description: SessionDescription::offer("loopback:offer:alice:audio,video"),
            },
            &mut again,
        )
        .await;
    assert_eq!(b.neg.registry().get(&id("alice")).unwrap().id, link);
    assert_eq!(b.neg.states()[&id("alice")], NegotiationState::Connected);
    assert!(matches!(&again.signals[..], [SignalMessage::Answer { .. }]));
}

#[tokio::test(start_paused = true)]
async fn retry_offer_replaces_stale_answer_link() {
    let mut a = side("alice");
    let mut b = side("bob");
    let mut out = Outbox::default();
    a.neg.on_presence_join(id("bob"), &mut out).await;

    // Bob answers the first offer, but the answer never reaches alice.
    tokio::time::advance(Duration::from_secs(1)).await;
    let mut lost = Outbox::default();
    for msg in out.signals {
        b.neg.on_signal(msg, &mut lost).await;
    }
    let stale = b.neg.registry().get(&id("alice")).unwrap().id;

    tokio::time::advance(Duration::from_secs(14)).await;
    let mut retry = Outbox::default();
    a.neg.sweep(Instant::now(), &mut retry).await;
    assert!(matches!(&retry.signals[..], [SignalMessage::Offer { .. }]));

    let mut answered = Outbox::default();
    for msg in retry.signals {
        b.neg.on_signal(msg, &mut answered).await;
    }
    assert_ne!(b.neg.registry().get(&id("alice")).unwrap().id, stale);
    let mut applied = Outbox::default();
    for msg in answered.signals {
        a.neg.on_signal(msg, &mut applied).await;
    }
    assert_eq!(a.neg.states()[&id("bob")], NegotiationState::Connected);

    // Bob's timer restarted with the retry, so his link survives the sweep.
    tokio::time::advance(Duration::from_millis(1500)).await;
    let mut swept = Outbox::default();
    b.neg.sweep(Instant::now(), &mut swept).await;
    assert!(swept.is_empty());
    assert!(b.neg.registry().contains(&id("alice")));

    settle(&mut a, &mut b, Vec::new(), Vec::new()).await;
    assert_eq!(b.neg.states()[&id("alice")], NegotiationState::Connected);
}

#[tokio::test]
async fn candidate_before_answer_waits_on_link() {
    let mut a = side("alice");
    let mut b = side("bob");
    let mut offer = Outbox::default();
    a.neg.on_presence_join(id("bob"), &mut offer).await;

    let mut answer = Outbox::default();
    for msg in offer.signals {
        b.neg.on_signal(msg, &mut answer).await;
    }

    // Bob's candidate overtakes his answer.
    let mut out = Outbox::default();
    a.neg
        .on_signal(
            SignalMessage::Candidate {
                target: id("alice"),
                from: id("bob"),
                candidate: IceCandidate::new("candidate:1 1 udp 1 10.0.0.2 5000 typ host"),
            },
            &mut out,
        )
        .await;
    let link = a.neg.registry().get(&id("bob")).unwrap();
    assert_eq!(link.state, NegotiationState::OfferSent);
    assert_eq!(link.pending_candidates.len(), 1);
    assert_eq!(a.neg.buffered_candidates(), 0);

    for msg in answer.signals {
        a.neg.on_signal(msg, &mut out).await;
    }
    let link = a.neg.registry().get(&id("bob")).unwrap();
    assert!(link.remote_description_applied);
    assert!(link.pending_candidates.is_empty());
    assert_eq!(link.state, NegotiationState::Connected);
}

#[tokio::test]
async fn glare_resolves_to_smaller_ids_offer() {
    let mut a = observer("alice");
    let mut b = observer("bob");
    let mut out_a = Outbox::default();
    let mut out_b = Outbox::default();
    a.neg.on_presence_join(id("bob"), &mut out_a).await;
    b.neg.on_presence_join(id("alice"), &mut out_b).await;
    assert_eq!(out_a.signals.len(), 1);
    assert_eq!(out_b.signals.len(), 1);

    settle(&mut a, &mut b, out_a.signals, out_b.signals).await;

    assert_eq!(a.neg.registry().len(), 1);
    assert_eq!(b.neg.registry().len(), 1);
    assert!(a.neg.registry().get(&id("bob")).unwrap().initiator);
    assert!(!b.neg.registry().get(&id("alice")).unwrap().initiator);
    assert_eq!(a.neg.states()[&id("bob")], NegotiationState::Connected);
    assert_eq!(b.neg.states()[&id("alice")], NegotiationState::Connected);
}

#[tokio::test]
async fn early_candidates_are_held_then_applied() {
    let mut b = side("bob");
    let mut out = Outbox::default();
    b.neg
        .on_signal(
            SignalMessage::Candidate {
                target: id("bob"),
                from: id("alice"),
                candidate: IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"),
            },
            &mut out,
        )
        .await;
    assert!(out.is_empty());
    assert_eq!(b.neg.buffered_candidates(), 1);
    assert!(b.neg.registry().is_empty());

    b.neg
        .on_signal(
            SignalMessage::Offer {
                target: id("bob"),
                from: id("alice"),
                description: SessionDescription::offer("loopback:offer:alice:audio"),
            },
            &mut out,
        )
        .await;
    assert_eq!(b.neg.buffered_candidates(), 0);
    assert_eq!(b.neg.states()[&id("alice")], NegotiationState::Connected);
    assert!(out
        .events
        .iter()
        .any(|e| matches!(e, SessionEvent::PeerConnected(p) if *p == id("alice"))));
}

#[tokio::test]
async fn leave_removes_link_once() {
    let mut a = side("alice");
    let mut b = side("bob");
    let mut out = Outbox::default();
    a.neg.on_presence_join(id("bob"), &mut out).await;
    settle(&mut a, &mut b, out.signals, Vec::new()).await;

    let token = a.neg.registry().get(&id("bob")).unwrap().cancel.clone();
    let mut out = Outbox::default();
    a.neg.on_presence_leave(id("bob"), &mut out).await;
    assert!(matches!(&out.events[..], [SessionEvent::PeerLeft(p)] if *p == id("bob")));
    assert!(a.neg.registry().is_empty());
    assert!(token.is_cancelled());

    let mut again = Outbox::default();
    a.neg.on_presence_leave(id("bob"), &mut again).await;
    assert!(again.is_empty());
}

#[tokio::test]
async fn leave_removes_pending_links() {
    let mut a = side("alice");
    let mut out = Outbox::default();
    a.neg.on_presence_join(id("bob"), &mut out).await;
    assert_eq!(a.neg.states()[&id("bob")], NegotiationState::OfferSent);

    let mut b = side("bob");
    let mut answered = Outbox::default();
    for msg in out.signals {
        b.neg.on_signal(msg, &mut answered).await;
    }
    assert_eq!(b.neg.states()[&id("alice")], NegotiationState::AnswerSent);

    for (s, peer) in [(&mut a, id("bob")), (&mut b, id("alice"))] {
        let token = s.neg.registry().get(&peer).unwrap().cancel.clone();
        let mut out = Outbox::default();
        s.neg.on_presence_leave(peer.clone(), &mut out).await;
        assert!(matches!(&out.events[..], [SessionEvent::PeerLeft(p)] if *p == peer));
        assert!(s.neg.registry().is_empty());
        assert!(token.is_cancelled());
    }
}

#[tokio::test]
async fn stale_transport_events_are_ignored() {
    let mut a = side("alice");
    let mut out = Outbox::default();
    a.neg.on_presence_join(id("bob"), &mut out).await;

    let mut late = Outbox::default();
    a.neg
        .on_transport_event(
            TransportEvent {
                remote: id("bob"),
                link: LinkId(999),
                kind: TransportEventKind::StateChanged(TransportState::Connected),
            },
            &mut late,
        )
        .await;
    assert!(late.is_empty());
    assert_eq!(a.neg.states()[&id("bob")], NegotiationState::OfferSent);
}

#[tokio::test(start_paused = true)]
async fn stalled_offer_is_retried_then_dropped() {
    let mut a = side("alice");
    let mut out = Outbox::default();
    a.neg.on_presence_join(id("bob"), &mut out).await;
    let first = a.neg.registry().get(&id("bob")).unwrap().id;

    // Not yet stale.
    tokio::time::advance(Duration::from_secs(5)).await;
    let mut quiet = Outbox::default();
    a.neg.sweep(Instant::now(), &mut quiet).await;
    assert!(quiet.is_empty());

    for attempt in 2..=3 {
        tokio::time::advance(Duration::from_secs(15)).await;
        let mut out = Outbox::default();
        a.neg.sweep(Instant::now(), &mut out).await;
        let link = a.neg.registry().get(&id("bob")).unwrap();
        assert_eq!(link.attempts, attempt);
        assert_ne!(link.id, first);
        assert!(matches!(&out.signals[..], [SignalMessage::Offer { .. }]));
        assert!(out.events.is_empty());
    }

    tokio::time::advance(Duration::from_secs(15)).await;
    let mut out = Outbox::default();
    a.neg.sweep(Instant::now(), &mut out).await;
    assert!(a.neg.registry().is_empty());
    assert!(matches!(
        &out.events[..],
        [SessionEvent::PeerDropped { peer, reason: DropReason::NegotiationStalled }] if *peer == id("bob")
    ));
}

#[tokio::test(start_paused = true)]
async fn stalled_answer_is_dropped_without_retry() {
    let mut b = side("bob");
    let mut out = Outbox::default();
    b.neg
        .on_signal(
            SignalMessage::Offer {
                target: id("bob"),
                from: id("alice"),
                description: SessionDescription::offer("loopback:offer:alice:audio"),
            },
            &mut out,
        )
        .await;
    assert_eq!(b.neg.states()[&id("alice")], NegotiationState::AnswerSent);

    tokio::time::advance(Duration::from_secs(16)).await;
    let mut out = Outbox::default();
    b.neg.sweep(Instant::now(), &mut out).await;
    assert!(b.neg.registry().is_empty());
    assert!(out.signals.is_empty());
    assert_eq!(out.events.len(), 1);
}

#[tokio::test]
async fn relay_loss_drops_every_link() {
    let mut a = side("alice");
    let mut out = Outbox::default();
    a.neg
        .on_presence_sync(vec![id("bob"), id("carol")], &mut out)
        .await;
    assert_eq!(a.neg.registry().len(), 2);

    let mut out = Outbox::default();
    a.neg.on_relay_lost(&mut out).await;
    assert!(a.neg.registry().is_empty());
    assert_eq!(a.neg.present().count(), 0);
    assert_eq!(
        out.events
            .iter()
            .filter(|e| matches!(e, SessionEvent::PeerLeft(_)))
            .count(),
        2
    );
}
