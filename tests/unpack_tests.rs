
use anyhow::Result;
use micasa::command::CommandRunner;
use micasa::distribute::{Distribution, FileDistributor};
use micasa::error::MicasaError;
use micasa::extract::ArchiveUnpacker;
use micasa::formula::InstallerDirective;
use std::fs;
use test_helpers::{TestEnvironment, tar_gz};
use tokio_util::sync::CancellationToken;

fn directive(requires_fuse: Option<bool>) -> InstallerDirective {
    InstallerDirective {
        tool: "github-archive".to_string(),
        package_id: None,
        executable: None,
        installer_url: None,
        repo_url: Some("https://github.com/example/tool".to_string()),
        requires_fuse,
    }
}

#[tokio::test]
async fn test_tar_gz_unpacks_next_to_archive() -> Result<()> {
    let env = TestEnvironment::new();
    let archive = env.work.join("fd-v10.3.0-x86_64-unknown-linux-musl.tar.gz");
    fs::write(
        &archive,
        tar_gz(&[
            ("fd-v10.3.0-x86_64-unknown-linux-musl/fd", "#!/bin/sh\necho fd 10.3.0"),
            ("fd-v10.3.0-x86_64-unknown-linux-musl/fd.1", "fd man"),
            ("fd-v10.3.0-x86_64-unknown-linux-musl/LICENSE-MIT", "mit"),
        ]),
    )?;

    ArchiveUnpacker::new(CommandRunner::default())
        .unpack(&directive(None), &archive, &CancellationToken::new())
        .await?;

    let unpacked = env.work.join("fd-v10.3.0-x86_64-unknown-linux-musl");
    assert_eq!(fs::read_to_string(unpacked.join("fd.1"))?, "fd man");
    assert!(unpacked.join("fd").is_file());
    Ok(())
}

#[tokio::test]
async fn test_unpacked_archive_distributes() -> Result<()> {
    let env = TestEnvironment::new();
    let archive = env.work.join("fd.tar.gz");
    fs::write(
        &archive,
        tar_gz(&[
            ("fd-v10.3.0/fd", "fd binary"),
            ("fd-v10.3.0/fd.1", "fd man"),
            ("fd-v10.3.0/README.md", "readme"),
        ]),
    )?;

    ArchiveUnpacker::new(CommandRunner::default())
        .unpack(&directive(None), &archive, &CancellationToken::new())
        .await?;
    let distribution = FileDistributor::new(&env.settings()).distribute(&env.work, None)?;

    assert_eq!(
        distribution,
        Distribution::Binary {
            binary: env.bin_dir().join("fd"),
            man_page: Some(env.man1_dir().join("fd.1")),
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_corrupt_tar_gz_is_external_tool_failure() -> Result<()> {
    let env = TestEnvironment::new();
    let archive = env.work.join("broken.tar.gz");
    fs::write(&archive, "this is not gzip data")?;

    let err = ArchiveUnpacker::new(CommandRunner::default())
        .unpack(&directive(None), &archive, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MicasaError::ExternalTool { .. }));
    Ok(())
}

#[tokio::test]
async fn test_fuse_appimage_is_made_executable_and_self_extracts() -> Result<()> {
    let env = TestEnvironment::new();
    // Stands in for an AppImage: honours --appimage-extract like the real thing
    let appimage = env.write_work_file(
        "tool-x86_64.AppImage",
        "#!/bin/sh\n[ \"$1\" = --appimage-extract ] || exit 2\nmkdir -p squashfs-root/usr/bin\necho extracted > squashfs-root/usr/bin/tool\n",
    );

    ArchiveUnpacker::new(CommandRunner::default())
        .unpack(&directive(Some(true)), &appimage, &CancellationToken::new())
        .await?;

    assert_eq!(
        fs::read_to_string(env.work.join("squashfs-root/usr/bin/tool"))?.trim(),
        "extracted"
    );

    use std::os::unix::fs::PermissionsExt;
    assert_eq!(fs::metadata(&appimage)?.permissions().mode() & 0o777, 0o700);
    Ok(())
}
