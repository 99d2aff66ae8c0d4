//! The smart HTTP v0 protocol operations: reference advertisement,
//! upload-pack (fetch), and receive-pack (push).
//!
//! Upload-pack negotiation is deliberately minimal: every `have` is answered
//! with `NAK` and the response pack carries the full closure of the wanted
//! commits. Packs are valid, just not minimal.

use std::collections::HashSet;

use crate::object::ObjectId;
use crate::pack;
use crate::pktline::{self, Pkt, PktReader};
use crate::repo::Repository;
use crate::{EngineError, EngineResult};

/// The two smart protocol services.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    UploadPack,
    ReceivePack,
}

impl ServiceKind {
    pub fn capabilities(self) -> &'static str {
        match self {
            // no-thin keeps clients from sending packs whose delta bases are
            // assumed present on the server.
            Self::UploadPack => "no-thin agent=anchorgit/0.1",
            Self::ReceivePack => "report-status delete-refs no-thin agent=anchorgit/0.1",
        }
    }
}

/// Build the reference advertisement body for `service`, without the
/// `# service=` prefix line (the HTTP layer owns that).
///
/// An empty repository advertises zero refs; for receive-pack the
/// capabilities ride on the customary zero-id placeholder line.
pub fn advertise_refs(repo: &Repository, service: ServiceKind) -> EngineResult<Vec<u8>> {
    let mut refs = repo.references()?;
    if let Some(head) = repo.head()? {
        // HEAD first, then the refs sorted by name.
        refs.insert(
            0,
            crate::refs::Reference {
                name: "HEAD".to_string(),
                id: head.id,
            },
        );
    }

    let mut out = Vec::new();
    if refs.is_empty() {
        if service == ServiceKind::ReceivePack {
            pktline::write_pkt_str(
                &mut out,
                &format!(
                    "{} capabilities^{{}}\0{}\n",
                    ObjectId::ZERO,
                    service.capabilities()
                ),
            );
        }
        pktline::write_flush(&mut out);
        return Ok(out);
    }

    for (i, r) in refs.iter().enumerate() {
        let line = if i == 0 {
            format!("{} {}\0{}\n", r.id, r.name, service.capabilities())
        } else {
            format!("{} {}\n", r.id, r.name)
        };
        pktline::write_pkt_str(&mut out, &line);
    }
    pktline::write_flush(&mut out);
    Ok(out)
}

/// Serve one upload-pack request: parse wants, answer `NAK` and a pack with
/// the closure of the wanted commits.
pub fn upload_pack(repo: &Repository, request: &[u8]) -> EngineResult<Vec<u8>> {
    let mut reader = PktReader::new(request);
    let mut wants: Vec<ObjectId> = Vec::new();

    while let Some(pkt) = reader.next_pkt()? {
        let Pkt::Data(payload) = pkt else { continue };
        let line = std::str::from_utf8(payload)
            .map_err(|_| EngineError::BadRequest("request line is not utf-8".into()))?
            .trim_end_matches('\n');

        if let Some(rest) = line.strip_prefix("want ") {
            let hex = rest.split(' ').next().unwrap_or(rest);
            wants.push(ObjectId::from_hex(hex)?);
        } else if line == "done" {
            break;
        }
        // `have` lines are ignored: negotiation always answers NAK below.
    }

    let mut wants_dedup = HashSet::new();
    wants.retain(|w| wants_dedup.insert(*w));

    let mut out = Vec::new();
    pktline::write_pkt_str(&mut out, "NAK\n");

    if !wants.is_empty() {
        let ids = repo.closure(&wants)?;
        let mut objects = Vec::with_capacity(ids.len());
        for id in ids {
            let (kind, body) = repo.odb().read(&id)?;
            objects.push((kind, body));
        }
        tracing::debug!(objects = objects.len(), "assembled upload pack");
        out.extend_from_slice(&pack::write_pack(&objects)?);
    }
    Ok(out)
}

/// One parsed push command.
#[derive(Clone, Debug)]
struct RefUpdate {
    old: ObjectId,
    new: ObjectId,
    name: String,
}

/// Serve one receive-pack request: apply the incoming pack, update refs,
/// and return the report-status body.
pub fn receive_pack(repo: &Repository, request: &[u8]) -> EngineResult<Vec<u8>> {
    let mut reader = PktReader::new(request);
    let mut commands: Vec<RefUpdate> = Vec::new();

    while let Some(pkt) = reader.next_pkt()? {
        match pkt {
            Pkt::Flush => break,
            Pkt::Data(payload) => {
                let line = std::str::from_utf8(payload)
                    .map_err(|_| EngineError::BadRequest("command line is not utf-8".into()))?;
                // The first command line carries client capabilities after a
                // NUL; they are not needed here.
                let line = line.split('\0').next().unwrap_or(line).trim_end();
                let mut parts = line.split(' ');
                let (Some(old), Some(new), Some(name)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(EngineError::BadRequest(format!(
                        "malformed update command {line:?}"
                    )));
                };
                commands.push(RefUpdate {
                    old: ObjectId::from_hex(old)?,
                    new: ObjectId::from_hex(new)?,
                    name: name.to_string(),
                });
            }
        }
    }

    if commands.is_empty() {
        return Err(EngineError::BadRequest("push carries no commands".into()));
    }

    // Everything after the command section is the pack. Deletion-only
    // pushes carry none.
    let pack_data = reader.rest();
    let mut unpack_error: Option<String> = None;
    if !pack_data.is_empty() {
        let odb = repo.odb().clone();
        let lookup = move |id: &ObjectId| odb.read(id).ok();
        match pack::parse_pack(pack_data, &lookup) {
            Ok(objects) => {
                for obj in &objects {
                    repo.odb().write(obj.kind, &obj.body)?;
                }
                tracing::debug!(objects = objects.len(), "unpacked push");
            }
            Err(e) => unpack_error = Some(e.to_string()),
        }
    }

    let mut report = Vec::new();
    match &unpack_error {
        None => pktline::write_pkt_str(&mut report, "unpack ok\n"),
        Some(e) => pktline::write_pkt_str(&mut report, &format!("unpack {e}\n")),
    }

    for cmd in &commands {
        if unpack_error.is_some() {
            pktline::write_pkt_str(
                &mut report,
                &format!("ng {} unpack failed\n", cmd.name),
            );
            continue;
        }
        match repo.update_reference(&cmd.name, &cmd.new) {
            Ok(()) => {
                tracing::debug!(reference = %cmd.name, old = %cmd.old, new = %cmd.new, "ref updated");
                pktline::write_pkt_str(&mut report, &format!("ok {}\n", cmd.name));
            }
            Err(e) => {
                tracing::warn!(reference = %cmd.name, error = %e, "ref update rejected");
                pktline::write_pkt_str(&mut report, &format!("ng {} {e}\n", cmd.name));
            }
        }
    }
    pktline::write_flush(&mut report);

    // A first push to a non-default branch should still give the
    // repository a resolvable head.
    if unpack_error.is_none() {
        for cmd in &commands {
            if !cmd.new.is_zero() && cmd.name.starts_with("refs/heads/") {
                repo.adopt_head_if_unborn(&cmd.name)?;
                break;
            }
        }
    }

    if let Some(e) = unpack_error {
        return Err(EngineError::BadPack(e));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;
    use crate::repo::testutil::commit_files;
    use crate::repo::HEAD_REF;
    use anchorgit_vfs::{Fs, MemoryStore, Vfs};
    use std::sync::Arc;

    fn new_repo() -> Repository {
        let fs: Arc<dyn Fs> = Arc::new(Vfs::new(Arc::new(MemoryStore::new())));
        Repository::init(fs).unwrap()
    }

    fn pkt_lines(body: &[u8]) -> Vec<String> {
        let mut reader = PktReader::new(body);
        let mut lines = Vec::new();
        while let Some(pkt) = reader.next_pkt().unwrap() {
            match pkt {
                Pkt::Flush => lines.push("FLUSH".to_string()),
                Pkt::Data(d) => lines.push(String::from_utf8_lossy(d).into_owned()),
            }
        }
        lines
    }

    #[test]
    fn empty_repo_advertises_zero_refs_for_fetch() {
        let repo = new_repo();
        let body = advertise_refs(&repo, ServiceKind::UploadPack).unwrap();
        assert_eq!(pkt_lines(&body), vec!["FLUSH"]);
    }

    #[test]
    fn empty_repo_advertises_capabilities_placeholder_for_push() {
        let repo = new_repo();
        let body = advertise_refs(&repo, ServiceKind::ReceivePack).unwrap();
        let lines = pkt_lines(&body);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&format!("{} capabilities^{{}}", ObjectId::ZERO)));
        assert!(lines[0].contains("report-status"));
    }

    #[test]
    fn advertisement_lists_head_then_refs_with_capabilities_once() {
        let repo = new_repo();
        let c = commit_files(&repo, &[], &[("f", b"x")], "one\n", 100);

        let body = advertise_refs(&repo, ServiceKind::UploadPack).unwrap();
        let lines = pkt_lines(&body);
        assert!(lines[0].starts_with(&format!("{c} HEAD\0")));
        assert!(lines[0].contains("no-thin"));
        assert_eq!(lines[1], format!("{c} {HEAD_REF}\n"));
        assert_eq!(lines[2], "FLUSH");
    }

    #[test]
    fn upload_pack_returns_nak_and_full_closure() {
        let repo = new_repo();
        let c = commit_files(&repo, &[], &[("f", b"content")], "one\n", 100);

        let mut request = Vec::new();
        pktline::write_pkt_str(&mut request, &format!("want {c}\n"));
        pktline::write_flush(&mut request);
        pktline::write_pkt_str(&mut request, "done\n");

        let response = upload_pack(&repo, &request).unwrap();
        let mut reader = PktReader::new(&response);
        assert_eq!(reader.next_pkt().unwrap(), Some(Pkt::Data(b"NAK\n")));

        let objects = pack::parse_pack(reader.rest(), &|_| None).unwrap();
        // One commit, one tree, one blob.
        assert_eq!(objects.len(), 3);
        assert!(objects.iter().any(|o| o.id == c));
        assert!(objects
            .iter()
            .any(|o| o.kind == ObjectKind::Blob && o.body == b"content"));
    }

    #[test]
    fn receive_pack_applies_objects_and_updates_refs() {
        // Build the pushed objects in a scratch repository, pack them, and
        // push into a fresh one.
        let scratch = new_repo();
        let c = commit_files(&scratch, &[], &[("README.md", b"hi")], "init\n", 100);
        let ids = scratch.closure(&[c]).unwrap();
        let objects: Vec<_> = ids
            .iter()
            .map(|id| scratch.odb().read(id).unwrap())
            .collect();
        let pack_bytes = pack::write_pack(&objects).unwrap();

        let mut request = Vec::new();
        pktline::write_pkt_str(
            &mut request,
            &format!("{} {} {}\0report-status\n", ObjectId::ZERO, c, HEAD_REF),
        );
        pktline::write_flush(&mut request);
        request.extend_from_slice(&pack_bytes);

        let target = new_repo();
        let report = receive_pack(&target, &request).unwrap();
        let lines = pkt_lines(&report);
        assert_eq!(lines[0], "unpack ok\n");
        assert_eq!(lines[1], format!("ok {HEAD_REF}\n"));

        let head = target.head().unwrap().unwrap();
        assert_eq!(head.id, c);
        assert_eq!(
            target.blob(&target.tree_files(&c).unwrap()[0].id).unwrap(),
            b"hi"
        );
    }

    #[test]
    fn receive_pack_adopts_head_for_non_default_branch() {
        let scratch = new_repo();
        let c = commit_files(&scratch, &[], &[("f", b"x")], "init\n", 100);
        let ids = scratch.closure(&[c]).unwrap();
        let objects: Vec<_> = ids
            .iter()
            .map(|id| scratch.odb().read(id).unwrap())
            .collect();

        let mut request = Vec::new();
        pktline::write_pkt_str(
            &mut request,
            &format!("{} {} refs/heads/master\n", ObjectId::ZERO, c),
        );
        pktline::write_flush(&mut request);
        request.extend_from_slice(&pack::write_pack(&objects).unwrap());

        let target = new_repo();
        receive_pack(&target, &request).unwrap();
        let head = target.head().unwrap().unwrap();
        assert_eq!(head.name, "refs/heads/master");
        assert_eq!(head.id, c);
    }

    #[test]
    fn receive_pack_deletes_refs_without_a_pack() {
        let repo = new_repo();
        let c = commit_files(&repo, &[], &[("f", b"x")], "one\n", 100);

        let mut request = Vec::new();
        pktline::write_pkt_str(
            &mut request,
            &format!("{c} {} {HEAD_REF}\n", ObjectId::ZERO),
        );
        pktline::write_flush(&mut request);

        let report = receive_pack(&repo, &request).unwrap();
        let lines = pkt_lines(&report);
        assert_eq!(lines[0], "unpack ok\n");
        assert_eq!(lines[1], format!("ok {HEAD_REF}\n"));
        assert!(repo.head().unwrap().is_none());
    }

    #[test]
    fn receive_pack_rejects_empty_command_section() {
        let repo = new_repo();
        let mut request = Vec::new();
        pktline::write_flush(&mut request);
        assert!(matches!(
            receive_pack(&repo, &request),
            Err(EngineError::BadRequest(_))
        ));
    }
}
