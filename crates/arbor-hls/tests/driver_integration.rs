
use std::time::Duration;

use arbor_hls::model::RepAddress;
use fixture::*;

async fn open_live(server: &TestServer) -> (arbor_hls::HlsTree, RepAddress) {
    let tree = test_tree();
    let addr = RepAddress::new(0, 0, 0);
    tree.open(server.url("/master.m3u8")).await.unwrap();
    tree.with_presentation_mut(|model| {
        model.representation_mut(addr).unwrap().source_url = Some(server.url("/live.m3u8"));
    })
    .await;
    (tree, addr)
}

/// Poll the tree until `pred` holds or the deadline passes.
async fn wait_for(
    tree: &arbor_hls::HlsTree,
    mut pred: impl FnMut(&arbor_hls::model::Presentation) -> bool,
) -> bool {
    for _ in 0..40 {
        if tree.with_presentation(&mut pred).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

#[tokio::test]
async fn live_playlist_keeps_refreshing() {
    let server = TestServer::new().await;
    server.set_live_window(0, 3, false);
    let (tree, addr) = open_live(&server).await;

    tree.prepare_representation(addr, false).await.unwrap();
    tree.with_presentation(|model| {
        assert!(model.is_live);
        assert!(model.refresh_playlist);
        assert_eq!(model.representation(addr).unwrap().start_number, 0);
    })
    .await;

    // The window slides; the background driver must pick it up
    server.set_live_window(5, 3, false);
    let refreshed = wait_for(&tree, |model| {
        model.representation(addr).is_some_and(|r| r.start_number == 5)
    })
    .await;
    assert!(refreshed, "driver never refreshed the sliding window");

    tree.close().await;
}

#[tokio::test]
async fn endlist_stops_the_refresh() {
    let server = TestServer::new().await;
    server.set_live_window(0, 3, false);
    let (tree, addr) = open_live(&server).await;

    tree.prepare_representation(addr, false).await.unwrap();

    server.set_live_window(3, 3, true);
    let ended = wait_for(&tree, |model| !model.refresh_playlist).await;
    assert!(ended, "ENDLIST never propagated");

    // Once ended, further refreshes are no-ops
    let fetches = server.request_count("/live.m3u8");
    tree.refresh_live_segments().await.unwrap();
    assert_eq!(server.request_count("/live.m3u8"), fetches);

    tree.close().await;
}

#[tokio::test]
async fn tight_refresh_preserves_the_cursor() {
    let server = TestServer::new().await;
    server.set_live_window(10, 5, false);
    let (tree, addr) = open_live(&server).await;

    tree.prepare_representation(addr, false).await.unwrap();
    tree.with_presentation_mut(|model| {
        let rep = model.representation_mut(addr).unwrap();
        rep.current_segment = Some(2); // playing segment number 12
        assert_eq!(rep.current_segment_number(), Some(12));
    })
    .await;

    // The edge advanced past the window start but not past the cursor
    server.set_live_window(12, 5, false);
    tree.refresh_segments(addr).await.unwrap();

    tree.with_presentation(|model| {
        let rep = model.representation(addr).unwrap();
        assert_eq!(rep.start_number, 12);
        assert_eq!(rep.current_segment, Some(0));
        assert_eq!(rep.current_segment_number(), Some(12));
    })
    .await;

    tree.close().await;
}

#[tokio::test]
async fn manual_refresh_updates_every_enabled_representation() {
    let server = TestServer::new().await;
    server.set_live_window(0, 3, false);
    let (tree, addr) = open_live(&server).await;
    tree.prepare_representation(addr, false).await.unwrap();

    server.set_live_window(2, 3, false);
    tree.refresh_live_segments().await.unwrap();

    tree.with_presentation(|model| {
        let rep = model.representation(addr).unwrap();
        assert_eq!(rep.start_number, 2);
        assert_eq!(rep.timeline.len(), 3);
        assert!(model.last_updated.is_some());
    })
    .await;

    tree.close().await;
}
