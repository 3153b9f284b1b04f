//! End-to-end tab synchronization scenarios against the in-memory
//! registry emulation.

mod support;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use jetty::client::WorkspaceClient;
use jetty::model::{PaneId, TabId};
use jetty::transport::EventReceiver;

use support::{Registry, SharedLayoutStore, settle};

fn new_client(registry: &mut Registry) -> (WorkspaceClient, EventReceiver) {
    let (end, rx) = registry.connect();
    let (client, _ui) = WorkspaceClient::new(end, Box::new(SharedLayoutStore::new()));
    (client, rx)
}

/// Drain the gate and any broadcasts queued behind it.
fn drain(
    registry: &mut Registry,
    client: &mut WorkspaceClient,
    rx: &mut EventReceiver,
    now: Instant,
) {
    settle(registry, &mut [(&mut *client, &mut *rx)], now);
    let after_gate = now + Duration::from_millis(300);
    client.tick(after_gate).expect("tick");
    settle(registry, &mut [(&mut *client, &mut *rx)], after_gate);
}

#[test]
fn create_tab_in_empty_home_pane() {
    let mut registry = Registry::new();
    let (mut client, mut rx) = new_client(&mut registry);
    let t0 = Instant::now();
    settle(&mut registry, &mut [(&mut client, &mut rx)], t0);

    let tab = client.create_tab(PaneId::Primary, t0).expect("create tab");
    drain(&mut registry, &mut client, &mut rx, t0);

    let store = client.store();
    assert_eq!(store.panes().len(), 1);
    assert_eq!(store.tab_count(), 1);
    assert_eq!(store.pane(PaneId::Primary).unwrap().active, Some(tab.clone()));
    assert_eq!(registry.tab_ids(), vec![tab]);
}

#[test]
fn split_toggle_round_trip() {
    let mut registry = Registry::new();
    let (mut client, mut rx) = new_client(&mut registry);
    let t0 = Instant::now();
    settle(&mut registry, &mut [(&mut client, &mut rx)], t0);

    let first = client.create_tab(PaneId::Primary, t0).expect("create tab");
    drain(&mut registry, &mut client, &mut rx, t0);

    let t1 = t0 + Duration::from_secs(1);
    let seeded = client.toggle_split_on(t1).expect("split on");
    drain(&mut registry, &mut client, &mut rx, t1);

    {
        let store = client.store();
        assert!(store.is_split());
        let secondary = store.pane(PaneId::Secondary).unwrap();
        assert_eq!(secondary.tabs.len(), 1, "secondary gains exactly one new tab");
        assert_eq!(secondary.tabs[0].id, seeded);
    }

    let t2 = t1 + Duration::from_secs(1);
    client.switch_active(PaneId::Primary, &first).expect("switch");
    client.toggle_split_off(t2).expect("split off");
    drain(&mut registry, &mut client, &mut rx, t2);

    let store = client.store();
    assert!(!store.is_split());
    let primary = store.pane(PaneId::Primary).unwrap();
    let order: Vec<TabId> = primary.tabs.iter().map(|t| t.id.clone()).collect();
    assert_eq!(order, vec![first.clone(), seeded]);
    assert_eq!(primary.active, Some(first));
}

#[test]
fn tab_created_on_one_device_appears_on_the_other() {
    let mut registry = Registry::new();
    let (mut alpha, mut alpha_rx) = new_client(&mut registry);
    let (mut beta, mut beta_rx) = new_client(&mut registry);
    let t0 = Instant::now();
    settle(
        &mut registry,
        &mut [(&mut alpha, &mut alpha_rx), (&mut beta, &mut beta_rx)],
        t0,
    );

    let tab = alpha.create_tab(PaneId::Primary, t0).expect("create tab");
    let after_gate = t0 + Duration::from_millis(300);
    alpha.tick(after_gate).expect("tick");
    settle(
        &mut registry,
        &mut [(&mut alpha, &mut alpha_rx), (&mut beta, &mut beta_rx)],
        after_gate,
    );

    assert!(beta.store().find_tab(&tab).is_some(), "broadcast must reach beta");
    assert_eq!(beta.store().pane_of(&tab), Some(beta.store().home_pane()));
}

#[test]
fn applying_the_same_broadcast_twice_is_idempotent() {
    let mut registry = Registry::new();
    let (mut client, mut rx) = new_client(&mut registry);
    let t0 = Instant::now();
    settle(&mut registry, &mut [(&mut client, &mut rx)], t0);

    client.create_tab(PaneId::Primary, t0).expect("create tab");
    drain(&mut registry, &mut client, &mut rx, t0);

    let later = t0 + Duration::from_secs(5);
    let ids_before = client.store().tab_ids();
    registry.broadcast_sync();
    registry.broadcast_sync();
    settle(&mut registry, &mut [(&mut client, &mut rx)], later);

    assert_eq!(client.store().tab_ids(), ids_before);
    assert_eq!(client.store().tab_count(), ids_before.len());
}

#[test]
fn conservation_across_devices_after_quiescence() {
    let mut registry = Registry::new();
    let (mut alpha, mut alpha_rx) = new_client(&mut registry);
    let (mut beta, mut beta_rx) = new_client(&mut registry);
    let t0 = Instant::now();
    settle(
        &mut registry,
        &mut [(&mut alpha, &mut alpha_rx), (&mut beta, &mut beta_rx)],
        t0,
    );

    let kept = alpha.create_tab(PaneId::Primary, t0).expect("create");
    let doomed = alpha.create_tab(PaneId::Primary, t0).expect("create");
    let after_gate = t0 + Duration::from_millis(300);
    alpha.tick(after_gate).expect("tick");
    settle(
        &mut registry,
        &mut [(&mut alpha, &mut alpha_rx), (&mut beta, &mut beta_rx)],
        after_gate,
    );

    // Beta closes one of alpha's tabs from its own layout.
    let pane = beta.store().pane_of(&doomed).expect("beta holds the tab");
    let t1 = after_gate + Duration::from_secs(1);
    beta.close_tab(pane, &doomed, t1).expect("close");
    let t2 = t1 + Duration::from_millis(300);
    alpha.tick(t2).expect("tick");
    beta.tick(t2).expect("tick");
    settle(
        &mut registry,
        &mut [(&mut alpha, &mut alpha_rx), (&mut beta, &mut beta_rx)],
        t2,
    );

    let canonical: HashSet<TabId> = registry.tab_ids().into_iter().collect();
    assert_eq!(canonical, HashSet::from([kept]));
    for client in [&alpha, &beta] {
        assert_eq!(client.store().tab_ids(), canonical);
        let flattened: usize = client.store().panes().iter().map(|p| p.tabs.len()).sum();
        assert_eq!(flattened, canonical.len(), "no tab in two panes or in none");
    }
}

#[test]
fn remote_close_of_last_secondary_tab_merges_the_pane_away() {
    let mut registry = Registry::new();
    let (mut alpha, mut alpha_rx) = new_client(&mut registry);
    let (mut beta, mut beta_rx) = new_client(&mut registry);
    let t0 = Instant::now();
    settle(
        &mut registry,
        &mut [(&mut alpha, &mut alpha_rx), (&mut beta, &mut beta_rx)],
        t0,
    );

    alpha.create_tab(PaneId::Primary, t0).expect("create");
    let t1 = t0 + Duration::from_millis(400);
    let seeded = alpha.toggle_split_on(t1).expect("split on");
    let t2 = t1 + Duration::from_millis(300);
    alpha.tick(t2).expect("tick");
    settle(
        &mut registry,
        &mut [(&mut alpha, &mut alpha_rx), (&mut beta, &mut beta_rx)],
        t2,
    );
    assert!(alpha.store().is_split());

    let pane = beta.store().pane_of(&seeded).expect("beta holds the tab");
    let t3 = t2 + Duration::from_secs(1);
    beta.close_tab(pane, &seeded, t3).expect("close");
    let t4 = t3 + Duration::from_millis(300);
    alpha.tick(t4).expect("tick");
    settle(
        &mut registry,
        &mut [(&mut alpha, &mut alpha_rx), (&mut beta, &mut beta_rx)],
        t4,
    );

    assert!(!alpha.store().is_split(), "orphan pane must be merged away");
    assert!(alpha.store().panes().iter().all(|p| !p.tabs.is_empty()));
}
