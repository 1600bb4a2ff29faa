fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use beam_protocol::{
        FileAnnouncement, FileRequest, InboundMessage, Message, MessageType, OutboundMessage,
        RestoredSession, StreamChunkCancel, StreamChunkRequest, StreamRequest,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    fn decode_inbound(name: &str) -> InboundMessage {
        InboundMessage::decode(&read_fixture(&format!("inbound/{name}")))
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"))
    }

    /// Encodes `msg` and compares it with the fixture (order-independent).
    fn assert_outbound(name: &str, msg: OutboundMessage) {
        let fixture = load_fixture(&format!("outbound/{name}"));
        let encoded: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            fixture, encoded,
            "encoding mismatch for {name}:\n  fixture: {fixture}\n  encoded: {encoded}"
        );
    }

    /// Deserializes a payload into a Rust type, re-serializes it, and compares
    /// the JSON values.
    fn payload_roundtrip<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(&format!("inbound/{name}"));
        let payload = fixture["payload"].clone();
        let parsed: T = serde_json::from_value(payload.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(payload, reserialized, "roundtrip mismatch for {name}");
    }

    // --- Inbound ---

    #[test]
    fn fixture_restore_session() {
        assert_eq!(
            decode_inbound("restore_session.json"),
            InboundMessage::RestoreSession(RestoredSession {
                key: "k-7f3a".into(),
                files: vec!["f-1".into(), "f-2".into()],
            })
        );
        payload_roundtrip::<RestoredSession>("restore_session.json");
    }

    #[test]
    fn fixture_new_session() {
        assert_eq!(
            decode_inbound("new_session.json"),
            InboundMessage::NewSession("k-7f3a".into())
        );
    }

    #[test]
    fn fixture_file_registrations() {
        assert_eq!(
            decode_inbound("file_registrations.json"),
            InboundMessage::FileRegistrations(vec!["f-1".into(), "f-2".into()])
        );
    }

    #[test]
    fn fixture_file_request() {
        assert_eq!(
            decode_inbound("file_request.json"),
            InboundMessage::FileRequest(FileRequest {
                file_id: "f-1".into(),
                download_id: "d-42".into(),
            })
        );
        payload_roundtrip::<FileRequest>("file_request.json");
    }

    #[test]
    fn fixture_download_cancelled() {
        assert_eq!(
            decode_inbound("download_cancelled.json"),
            InboundMessage::DownloadCancelled("d-42".into())
        );
    }

    #[test]
    fn fixture_stream_request() {
        assert_eq!(
            decode_inbound("stream_request.json"),
            InboundMessage::StreamRequest(StreamRequest {
                file_id: "f-2".into(),
                stream_key: "s-9".into(),
            })
        );
        payload_roundtrip::<StreamRequest>("stream_request.json");
    }

    #[test]
    fn fixture_stream_chunk() {
        assert_eq!(
            decode_inbound("stream_chunk.json"),
            InboundMessage::StreamChunk(StreamChunkRequest {
                stream_key: "s-9".into(),
                chunk_id: "c-3".into(),
                range: (1_048_576, 2_097_152),
            })
        );
        payload_roundtrip::<StreamChunkRequest>("stream_chunk.json");
    }

    #[test]
    fn fixture_stream_chunk_cancel() {
        assert_eq!(
            decode_inbound("stream_chunk_cancel.json"),
            InboundMessage::StreamChunkCancel(StreamChunkCancel {
                stream_key: "s-9".into(),
                chunk_id: "c-3".into(),
            })
        );
        payload_roundtrip::<StreamChunkCancel>("stream_chunk_cancel.json");
    }

    // --- Outbound ---

    #[test]
    fn fixture_create_session() {
        assert_outbound("create_session.json", OutboundMessage::CreateSession);
    }

    #[test]
    fn fixture_outbound_restore_session() {
        assert_outbound(
            "restore_session.json",
            OutboundMessage::RestoreSession("k-7f3a".into()),
        );
    }

    #[test]
    fn fixture_register_files() {
        assert_outbound(
            "register_files.json",
            OutboundMessage::RegisterFiles(vec![FileAnnouncement {
                id: "f-1".into(),
                name: "disk.iso".into(),
                size: 734_003_200,
                mime: "application/octet-stream".into(),
            }]),
        );
    }

    #[test]
    fn fixture_cancel_stream() {
        assert_outbound("cancel_stream.json", OutboundMessage::CancelStream("s-9".into()));
    }

    #[test]
    fn fixture_cancel_request() {
        assert_outbound("cancel_request.json", OutboundMessage::CancelRequest("d-42".into()));
    }

    // --- Compatibility ---

    #[test]
    fn every_fixture_has_a_known_type() {
        for dir in ["inbound", "outbound"] {
            for entry in fs::read_dir(fixtures_dir().join(dir)).unwrap() {
                let path = entry.unwrap().path();
                let msg: Message = serde_json::from_str(&fs::read_to_string(&path).unwrap())
                    .unwrap_or_else(|e| panic!("{}: {e}", path.display()));
                assert_ne!(msg.msg_type, MessageType::Unknown, "{}", path.display());
            }
        }
    }

    #[test]
    fn legacy_restore_session_without_files() {
        let msg =
            InboundMessage::decode(r#"{"type":"restore-session","payload":{"key":"k-old"}}"#)
                .unwrap();
        let InboundMessage::RestoreSession(restored) = msg else {
            panic!("expected restore-session");
        };
        assert_eq!(restored.key, "k-old");
        assert!(restored.files.is_empty(), "missing files should default to empty");
    }

    #[test]
    fn future_message_type_is_unrecognized() {
        let msg = InboundMessage::decode(r#"{"type":"peer-stats","payload":{"peers":3}}"#).unwrap();
        assert_eq!(msg, InboundMessage::Unrecognized("peer-stats".into()));
    }

    #[test]
    fn extra_payload_fields_are_ignored() {
        let msg = InboundMessage::decode(
            r#"{"type":"file-request","payload":{"fileId":"f-1","downloadId":"d-1","peer":"p"}}"#,
        )
        .unwrap();
        assert!(matches!(msg, InboundMessage::FileRequest(_)));
    }
}
