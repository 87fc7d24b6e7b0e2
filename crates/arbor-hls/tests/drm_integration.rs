
use arbor_hls::model::{KeyResolution, RepAddress};
use arbor_net::{Net, NetOptions, ReqwestNet};
use fixture::*;

#[tokio::test]
async fn aes_segment_decrypts_end_to_end() {
    let server = TestServer::new().await;
    let tree = test_tree();
    let addr = RepAddress::new(0, 0, 0);

    tree.open(server.url("/master.m3u8")).await.unwrap();
    // Point the only representation at the encrypted playlist
    tree.with_presentation_mut(|model| {
        model.representation_mut(addr).unwrap().source_url = Some(server.url("/enc.m3u8"));
    })
    .await;
    tree.prepare_representation(addr, false).await.unwrap();

    let pssh_set = tree
        .with_presentation(|model| {
            let rep = model.representation(addr).unwrap();
            assert_eq!(rep.timeline.len(), 1);
            let pssh_set = rep.timeline[0].pssh_set;
            assert_ne!(pssh_set, 0, "the segment must cite the interned key");
            assert_eq!(model.periods[0].pssh_sets()[pssh_set as usize].usage_count, 1);
            pssh_set
        })
        .await;

    // Fetch the ciphertext the way a host would, then feed it through
    let net = ReqwestNet::new(NetOptions::default()).unwrap();
    let ciphertext = net
        .download(server.url("/enc_seg0.ts"), None)
        .await
        .unwrap()
        .body;

    let mut iv = [0u8; 16];
    let mut out = Vec::new();
    tree.on_data_arrived(0, pssh_set, &mut iv, &ciphertext, &mut out, true)
        .await
        .unwrap();

    assert_eq!(out, SEGMENT_PLAINTEXT);
    assert_eq!(server.request_count("/key.bin"), 1);

    // The key resolved once and is cached on the slot
    tree.with_presentation(|model| {
        let slot = &model.periods[0].pssh_sets()[pssh_set as usize];
        assert!(matches!(slot.key, KeyResolution::Resolved(_)));
    })
    .await;

    // A second segment chunk does not re-fetch the key
    let mut out2 = Vec::new();
    let mut iv2 = [0u8; 16];
    tree.on_data_arrived(0, pssh_set, &mut iv2, &ciphertext, &mut out2, true)
        .await
        .unwrap();
    assert_eq!(server.request_count("/key.bin"), 1);
}

#[tokio::test]
async fn unavailable_key_zero_fills_the_segment() {
    let server = TestServer::new().await;
    let tree = test_tree();
    let addr = RepAddress::new(0, 0, 0);

    tree.open(server.url("/master.m3u8")).await.unwrap();
    tree.with_presentation_mut(|model| {
        model.representation_mut(addr).unwrap().source_url = Some(server.url("/badkey.m3u8"));
    })
    .await;
    tree.prepare_representation(addr, false).await.unwrap();

    let pssh_set = tree
        .with_presentation(|model| model.representation(addr).unwrap().timeline[0].pssh_set)
        .await;

    let ciphertext = encrypted_segment(0);
    let mut iv = [0u8; 16];
    let mut out = Vec::new();
    tree.on_data_arrived(0, pssh_set, &mut iv, &ciphertext, &mut out, true)
        .await
        .unwrap();

    assert_eq!(out.len(), ciphertext.len());
    assert!(out.iter().all(|b| *b == 0), "failed key emits zeros");

    // The failure is recorded; the next chunk does not retry the fetch
    let fetches = server.request_count("/missing-key.bin");
    let mut out2 = Vec::new();
    tree.on_data_arrived(0, pssh_set, &mut iv, &ciphertext, &mut out2, true)
        .await
        .unwrap();
    assert_eq!(server.request_count("/missing-key.bin"), fetches);
}

#[tokio::test]
async fn clear_segments_pass_through_untouched() {
    let server = TestServer::new().await;
    let tree = test_tree();
    let addr = RepAddress::new(0, 0, 0);

    tree.open(server.url("/master.m3u8")).await.unwrap();
    tree.prepare_representation(addr, false).await.unwrap();

    let mut iv = [0u8; 16];
    let mut out = Vec::new();
    tree.on_data_arrived(0, 0, &mut iv, b"plain bytes", &mut out, true)
        .await
        .unwrap();
    assert_eq!(out, b"plain bytes");
}
