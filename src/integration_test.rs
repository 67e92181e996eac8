#[cfg(test)]
mod tests {
    use anyhow::Result;
    use bytes::Bytes;
    use file_store::{ClientCall, OpenMode, UploadOptions};

    use crate::{service::UploadSummary, testing::TestService};

    #[tokio::test]
    async fn test_local_upload_then_download() -> Result<()> {
        let test_srv = TestService::local(4, 4).await?;
        let service = &test_srv.service;

        let identity = service.identity("/docs/test.txt", UploadOptions::default())?;
        let body: &[u8] = b"This is a test";
        let summary = service.upload(&identity, body, OpenMode::CreateWrite).await?;
        assert_eq!(
            summary,
            UploadSummary {
                identity: "repo://default/docs/test.txt".to_string(),
                bytes: 14,
                chunks: 4,
            }
        );
        assert_eq!(
            tokio::fs::read(test_srv.storage_dir.path().join("docs/test.txt")).await?,
            b"This is a test"
        );

        let mut out = Vec::new();
        assert_eq!(service.download(&identity, &mut out).await?, 14);
        assert_eq!(out, b"This is a test");

        service.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_local_many_chunks_small_pool() -> Result<()> {
        let test_srv = TestService::local(2, 1000).await?;
        let service = &test_srv.service;

        let body: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let identity = service.identity("/blobs/pattern.bin", UploadOptions::default())?;
        let summary = service
            .upload(&identity, body.as_slice(), OpenMode::CreateWrite)
            .await?;
        assert_eq!(summary.chunks, 50);

        let mut out = Vec::new();
        service.download(&identity, &mut out).await?;
        assert_eq!(out, body);
        Ok(())
    }

    #[tokio::test]
    async fn test_local_append_and_partial() -> Result<()> {
        let test_srv = TestService::local(4, 2).await?;
        let service = &test_srv.service;

        let partial = UploadOptions {
            partial_upload: true,
            partial_target_bytesize: Some(9),
        };
        let identity = service.identity("/big.iso", partial)?;
        service
            .upload(&identity, &b"head-"[..], OpenMode::CreateWrite)
            .await?;
        service
            .upload(&identity, &b"tail"[..], OpenMode::AppendWrite)
            .await?;

        let root = test_srv.storage_dir.path();
        assert_eq!(tokio::fs::read(root.join("big.iso.dpart")).await?, b"head-tail");
        assert!(!root.join("big.iso").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_object_storage_ten_single_byte_chunks() -> Result<()> {
        let test_srv = TestService::object_storage(10, 1)?;
        let service = &test_srv.service;
        let objects = test_srv.objects.as_ref().unwrap();

        let identity = service.identity("/digits.txt", UploadOptions::default())?;
        let summary = service
            .upload(&identity, &b"0123456789"[..], OpenMode::CreateWrite)
            .await?;
        assert_eq!(summary.chunks, 10);
        assert_eq!(objects.object("digits.txt"), Some(Bytes::from_static(b"0123456789")));

        let mut out = Vec::new();
        service.download(&identity, &mut out).await?;
        assert_eq!(out, b"0123456789");
        Ok(())
    }

    #[tokio::test]
    async fn test_object_storage_append_copies_head() -> Result<()> {
        let test_srv = TestService::object_storage(8, 2)?;
        let service = &test_srv.service;
        let objects = test_srv.objects.as_ref().unwrap();
        objects.insert("logs/app.log", Bytes::from_static(b"line 1\n"));

        let identity = service.identity("/logs/app.log", UploadOptions::default())?;
        service
            .upload(&identity, &b"line 2\n"[..], OpenMode::AppendWrite)
            .await?;

        assert_eq!(
            objects.object("logs/app.log"),
            Some(Bytes::from_static(b"line 1\nline 2\n"))
        );
        let calls = objects.calls();
        assert!(calls
            .iter()
            .all(|call| !matches!(call, ClientCall::PutStream { .. })));
        assert!(calls.contains(&ClientCall::UploadPart {
            key: "logs/app.log".to_string(),
            part_number: 2,
            bytes: 7,
        }));
        Ok(())
    }

    #[tokio::test]
    async fn test_download_missing_object_fails() -> Result<()> {
        let test_srv = TestService::object_storage(1, 1)?;
        let service = &test_srv.service;

        let identity = service.identity("/nowhere.txt", UploadOptions::default())?;
        let mut out = Vec::new();
        let err = service.download(&identity, &mut out).await.unwrap_err();
        assert!(err.to_string().contains("opening repo://default/nowhere.txt"));
        Ok(())
    }
}
