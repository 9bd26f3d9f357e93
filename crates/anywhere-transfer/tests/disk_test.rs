//! Disk archive round trips and layout-to-layout copies.

use std::sync::Arc;

use anywhere_registry::{copy_graph, Descriptor, Manifest, MediaType, OciLayout, Storage};
use anywhere_transfer::{DiskDestination, DiskSource, ImageDestination, ImageMover, ImageSource};
use tokio_util::sync::CancellationToken;

async fn store_image(layout: &OciLayout, reference: &str, layer: &[u8]) -> Descriptor {
    let config = Descriptor::for_content(MediaType::OCI_CONFIG.into(), b"{}");
    let layer_desc = Descriptor::for_content(MediaType::OCI_LAYER_GZIP.into(), layer);
    let manifest = serde_json::to_vec(&Manifest::new(config.clone(), vec![layer_desc.clone()])).unwrap();
    let manifest_desc = Descriptor::for_content(MediaType::OCI_MANIFEST.into(), &manifest);

    layout.push(&config, b"{}".to_vec()).await.unwrap();
    layout.push(&layer_desc, layer.to_vec()).await.unwrap();
    layout.push(&manifest_desc, manifest).await.unwrap();
    layout.tag(&manifest_desc, reference).await.unwrap();
    manifest_desc
}

/// Source that finds everything already staged in the layout.
struct Staged;

#[async_trait::async_trait]
impl ImageSource for Staged {
    async fn load(&self, _cancel: &CancellationToken, _references: &[String]) -> anywhere_transfer::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn archive_round_trip_reproduces_references() {
    let dir = tempfile::tempdir().unwrap();
    let staging = Arc::new(OciLayout::create(dir.path().join("download")).unwrap());
    let one = store_image(&staging, "public.ecr.aws/eks-anywhere/one:v1", b"one").await;
    let two = store_image(&staging, "public.ecr.aws/eks-anywhere/two:v2", b"two").await;
    let archive = dir.path().join("out/images.tar.gz");

    let download = ImageMover::new(Staged, DiskDestination::new(Arc::clone(&staging), &archive));
    let references = vec![
        "public.ecr.aws/eks-anywhere/one:v1".to_string(),
        "public.ecr.aws/eks-anywhere/two:v2".to_string(),
        "public.ecr.aws/eks-anywhere/one:v1".to_string(),
    ];
    download
        .move_images(&CancellationToken::new(), &references)
        .await
        .unwrap();
    assert!(archive.exists());

    let imported = Arc::new(OciLayout::create(dir.path().join("import")).unwrap());
    DiskSource::new(Arc::clone(&imported), &archive)
        .load(&CancellationToken::new(), &references[..1])
        .await
        .unwrap();

    assert_eq!(imported.resolve("public.ecr.aws/eks-anywhere/one:v1").await.unwrap().digest, one.digest);
    assert_eq!(imported.resolve("public.ecr.aws/eks-anywhere/two:v2").await.unwrap().digest, two.digest);
    assert_eq!(imported.references().len(), 2);
}

#[tokio::test]
async fn empty_reference_lists_are_no_ops() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Arc::new(OciLayout::create(dir.path().join("layout")).unwrap());
    let archive = dir.path().join("images.tar");

    DiskDestination::new(Arc::clone(&layout), &archive)
        .write(&CancellationToken::new(), &[])
        .await
        .unwrap();
    assert!(!archive.exists());

    // the archive does not exist, so loading it would fail
    DiskSource::new(layout, &archive)
        .load(&CancellationToken::new(), &[])
        .await
        .unwrap();
}

#[tokio::test]
async fn second_copy_transfers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let src = OciLayout::create(dir.path().join("src")).unwrap();
    let dst = OciLayout::create(dir.path().join("dst")).unwrap();
    let root = store_image(&src, "a:1", b"layer").await;

    let first = copy_graph(&src, &dst, &root).await.unwrap();
    assert_eq!(first.copied, 3);

    let second = copy_graph(&src, &dst, &root).await.unwrap();
    assert_eq!(second.copied, 0);
    assert_eq!(second.bytes, 0);
    assert_eq!(second.skipped, 1);
}
