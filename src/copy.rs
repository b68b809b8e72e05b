//! Content-addressed copy engine: walks a manifest's transitive blob
//! closure in post-order and transfers whatever the destination doesn't
//! already have, then tags the result.

use std::collections::HashSet;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};

use crate::blob::BlobReader;
use crate::descriptor::Descriptor;
use crate::error::Error;
use crate::manifest::{Index, Manifest};
use crate::mediatype;
use crate::reference::Reference;
use crate::repository::Repository;

#[derive(Debug, Default, Clone, Copy)]
pub struct CopyStats {
    pub blobs_copied: u64,
    pub bytes_copied: u64,
    pub manifests_copied: u64,
    pub skipped_existing: u64,
}

/// A per-descriptor progress callback: invoked once a descriptor has either
/// been skipped (already present at the destination) or fully copied.
pub trait ProgressCallback: Fn(&Descriptor, bool) + Send + Sync {}
impl<T: Fn(&Descriptor, bool) + Send + Sync> ProgressCallback for T {}

/// Copy the artifact graph rooted at `src_reference` in `src` into `dst`,
/// tagging the result at `dst_reference`.
pub async fn copy(
    src: &Repository,
    src_reference: &Reference,
    dst: &Repository,
    dst_reference: &Reference,
) -> Result<CopyStats, Error> {
    copy_with_progress(src, src_reference, dst, dst_reference, &|_, _| {}).await
}

/// As [`copy`], but invokes `on_progress(descriptor, cache_hit)` after every
/// node is either skipped (already present downstream) or transferred.
pub async fn copy_with_progress(
    src: &Repository,
    src_reference: &Reference,
    dst: &Repository,
    dst_reference: &Reference,
    on_progress: &(dyn ProgressCallback),
) -> Result<CopyStats, Error> {
    let root = src.manifests.resolve(src_reference).await?;

    let mut stats = CopyStats::default();
    let mut seen = HashSet::new();
    copy_node(src, dst, &root, &mut seen, &mut stats, on_progress).await?;

    let bytes = drain(dst.fetch(&root).await?).await?;
    dst.manifests.push(dst_reference, &root.media_type, bytes).await?;

    Ok(stats)
}

fn copy_node<'a>(
    src: &'a Repository,
    dst: &'a Repository,
    descriptor: &'a Descriptor,
    seen: &'a mut HashSet<String>,
    stats: &'a mut CopyStats,
    on_progress: &'a (dyn ProgressCallback),
) -> BoxFuture<'a, Result<(), Error>> {
    async move {
        if !seen.insert(descriptor.digest.clone()) {
            return Ok(());
        }

        if dst.exists(descriptor).await? {
            stats.skipped_existing += 1;
            on_progress(descriptor, true);
            return Ok(());
        }

        let is_container = mediatype::is_manifest(&descriptor.media_type) || mediatype::is_index(&descriptor.media_type);
        let bytes = drain(src.fetch(descriptor).await?).await?;

        if is_container {
            for child in extract_children(&descriptor.media_type, &bytes)? {
                copy_node(src, dst, &child, seen, stats, on_progress).await?;
            }
        }

        dst.push(descriptor, bytes).await?;
        if is_container {
            stats.manifests_copied += 1;
        } else {
            stats.blobs_copied += 1;
            stats.bytes_copied += descriptor.size;
        }
        on_progress(descriptor, false);

        Ok(())
    }
    .boxed()
}

fn extract_children(media_type: &str, bytes: &[u8]) -> Result<Vec<Descriptor>, Error> {
    if mediatype::is_index(media_type) {
        let index: Index = serde_json::from_slice(bytes)?;
        Ok(index.manifests)
    } else {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        let mut children = Vec::with_capacity(manifest.layers.len() + 1);
        children.push(manifest.config);
        children.extend(manifest.layers);
        Ok(children)
    }
}

async fn drain(mut reader: Box<dyn BlobReader>) -> Result<Bytes, Error> {
    let mut buf = Vec::new();
    while let Some(chunk) = reader.read_chunk().await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}
