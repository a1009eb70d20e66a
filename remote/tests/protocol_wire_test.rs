//! Exact bytes on the wire for whole operation sequences, checked against a
//! receiver that acknowledges every unit and records everything it reads.

use anyhow::Result;
use remote::Error;
use remote::protocol::{AckChannel, FileMapping, Modes, Operation, builder, run_sequence};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn upload_sequence_bytes() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let f1 = tmp.path().join("f1");
    let f2 = tmp.path().join("f2");
    tokio::fs::write(&f1, "one").await?;
    tokio::fs::write(&f2, "").await?;
    let mappings = vec![
        FileMapping::new(&f1, "a/b/f1"),
        FileMapping::new(&f2, "a/c/f2"),
    ];
    let modes = Modes {
        dir_mode: 0o755,
        file_mode: Some(0o640),
    };
    let ops = builder::upload_sequence(&mappings, modes)?;
    let (client, server) = tokio::io::duplex(1024);
    // headers: D a, D b, C f1, E, D c, C f2, E, E; payloads: f1, f2
    let peer = tokio::spawn(receiver(server, vec![3, 0]));
    let (reader, writer) = tokio::io::split(client);
    let mut channel = AckChannel::new(writer, reader);
    channel.handshake().await?;
    let bytes = run_sequence(&mut channel, &ops, 2).await?;
    assert_eq!(bytes, 3);
    drop(channel);
    let received = peer.await?;
    let expected: &[u8] =
        b"D0755 0 a\nD0755 0 b\nC0640 3 f1\none\x00E\nD0755 0 c\nC0640 0 f2\n\x00E\nE\n";
    assert_eq!(received, expected);
    Ok(())
}

#[tokio::test]
async fn path_creation_bytes() -> Result<()> {
    let ops = builder::create_path_sequence("srv/app", 0o700)?;
    let (client, server) = tokio::io::duplex(1024);
    let peer = tokio::spawn(receiver(server, vec![]));
    let (reader, writer) = tokio::io::split(client);
    let mut channel = AckChannel::new(writer, reader);
    channel.handshake().await?;
    run_sequence(&mut channel, &ops, 1024).await?;
    drop(channel);
    assert_eq!(peer.await?, b"D0700 0 srv\nD0700 0 app\nE\nE\n");
    Ok(())
}

#[tokio::test]
async fn file_growing_during_transfer_is_size_mismatch() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let log = tmp.path().join("app.log");
    tokio::fs::write(&log, "0123").await?;
    let op = Operation::TransferFile {
        mode: Some(0o644),
        name: "app.log".to_string(),
        source: log.clone(),
    };
    let (client, mut server) = tokio::io::duplex(1024);
    let peer = tokio::spawn({
        let log = log.clone();
        async move {
            server.write_all(&[0]).await.unwrap();
            let mut header = Vec::new();
            while header.last() != Some(&b'\n') {
                header.push(server.read_u8().await.unwrap());
            }
            // the file keeps being written after its size was announced
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&log)
                .await
                .unwrap();
            file.write_all(b"456789").await.unwrap();
            file.flush().await.unwrap();
            server.write_all(&[0]).await.unwrap();
            let mut rest = Vec::new();
            server.read_to_end(&mut rest).await.unwrap();
            (header, rest)
        }
    });
    let (reader, writer) = tokio::io::split(client);
    let mut channel = AckChannel::new(writer, reader);
    channel.handshake().await?;
    match op.execute(&mut channel, 1024).await {
        Err(Error::SizeMismatch {
            declared,
            actual,
            ..
        }) => {
            assert_eq!(declared, 4);
            assert_eq!(actual, 10);
        }
        other => panic!("expected size mismatch, got {other:?}"),
    }
    drop(channel);
    let (header, rest) = peer.await?;
    assert_eq!(header, b"C0644 4 app.log\n");
    // the payload is never terminated, so the receiver cannot accept it
    assert_eq!(rest, b"0123");
    Ok(())
}

/// Acks the handshake and every unit until the sender hangs up.
///
/// `payloads` are the sizes of the files in the order they are sent, so the
/// payload and its trailing zero byte can be read and acked as one unit.
async fn receiver(mut stream: tokio::io::DuplexStream, payloads: Vec<usize>) -> Vec<u8> {
    stream.write_all(&[0]).await.unwrap();
    let mut received = Vec::new();
    let mut payloads = payloads.into_iter();
    loop {
        let mut line = Vec::new();
        loop {
            let byte = match stream.read_u8().await {
                Ok(byte) => byte,
                Err(_) => return received,
            };
            line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        received.extend_from_slice(&line);
        stream.write_all(&[0]).await.unwrap();
        if line.first() == Some(&b'C') {
            let size = payloads.next().unwrap();
            let mut payload = vec![0u8; size + 1];
            stream.read_exact(&mut payload).await.unwrap();
            received.extend_from_slice(&payload);
            stream.write_all(&[0]).await.unwrap();
        }
    }
}
