//! Readiness probing against a stand-in remote mount table.
#![cfg(unix)]

mod support;

use support::FakeRemote;
use mount::readiness::DEFAULT_MAX_TRIALS;
use mount::{Readiness, ReadinessProbe};

#[tokio::test]
async fn never_observed_mount_gives_up_after_exactly_max_trials() {
    let remote = FakeRemote::new();
    let (transport, target) = (remote.transport(), remote.target());

    let readiness = ReadinessProbe::new(&transport, &target)
        .probe("/mnt/never")
        .await;

    let Readiness::Unconfirmed(reason) = readiness else {
        panic!("mount should not be confirmed");
    };
    assert!(
        reason.contains("sshfs does not seem to be mounted on /mnt/never"),
        "{reason}"
    );
    assert_eq!(remote.mount_checks(), DEFAULT_MAX_TRIALS as usize);
}

#[tokio::test]
async fn encoded_spaces_are_matched() {
    let remote = FakeRemote::new();
    remote.set_mtab("sshfs on /mnt/my\\040dir type fuse.sshfs (rw,nosuid,nodev)\n");
    let (transport, target) = (remote.transport(), remote.target());

    let readiness = ReadinessProbe::new(&transport, &target)
        .probe("/mnt/my dir")
        .await;

    assert_eq!(readiness, Readiness::Confirmed);
    assert_eq!(remote.mount_checks(), 1);
}

#[tokio::test]
async fn macos_fuse_is_recognised() {
    let remote = FakeRemote::new();
    remote.set_mtab("sshfs@osxfuse0 on /Volumes/x (osxfuse, nodev, nosuid)\n");
    let (transport, target) = (remote.transport(), remote.target());

    let readiness = ReadinessProbe::new(&transport, &target)
        .probe("/Volumes/x")
        .await;
    assert_eq!(readiness, Readiness::Confirmed);
}

#[tokio::test]
async fn other_filesystems_do_not_count() {
    let remote = FakeRemote::new();
    remote.set_mtab("/dev/sda1 on /mnt/data type ext4 (rw)\n");
    let (transport, target) = (remote.transport(), remote.target());

    let readiness = ReadinessProbe::new(&transport, &target)
        .with_max_trials(3)
        .probe("/mnt/data")
        .await;

    assert!(matches!(readiness, Readiness::Unconfirmed(_)));
    assert_eq!(remote.mount_checks(), 3);
}

#[tokio::test]
async fn sibling_mount_points_do_not_count() {
    let remote = FakeRemote::new();
    remote.set_mtab(
        "sshfs on /mnt/ab type fuse.sshfs (rw)\n\
         sshfs on /mnt/a/b type fuse.sshfs (rw)\n",
    );
    let (transport, target) = (remote.transport(), remote.target());

    let readiness = ReadinessProbe::new(&transport, &target)
        .with_max_trials(2)
        .probe("/mnt/a")
        .await;

    assert!(matches!(readiness, Readiness::Unconfirmed(_)), "{readiness:?}");
    assert_eq!(remote.mount_checks(), 2);
}

#[tokio::test]
async fn mount_point_is_not_a_pattern() {
    let remote = FakeRemote::new();
    remote.set_mtab("sshfs on /mnt/aXb type fuse.sshfs (rw)\n");
    let (transport, target) = (remote.transport(), remote.target());

    let readiness = ReadinessProbe::new(&transport, &target)
        .with_max_trials(1)
        .probe("/mnt/a.b")
        .await;
    assert!(matches!(readiness, Readiness::Unconfirmed(_)), "{readiness:?}");

    remote.set_mtab("sshfs on /mnt/a.b type fuse.sshfs (rw)\n");
    let readiness = ReadinessProbe::new(&transport, &target)
        .with_max_trials(1)
        .probe("/mnt/a.b")
        .await;
    assert_eq!(readiness, Readiness::Confirmed);
}

#[tokio::test]
async fn probe_runs_through_the_transport() {
    let remote = FakeRemote::new();
    let (transport, target) = (remote.transport(), remote.target());

    ReadinessProbe::new(&transport, &target)
        .with_max_trials(1)
        .probe("/mnt/x")
        .await;

    assert_eq!(
        remote.ssh_invocations(),
        ["-p 2222 user@fake-host -- /bin/sh"]
    );
}
