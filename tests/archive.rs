use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;

use flate2::read::GzDecoder;

use deploy_hub::archive::{self, Archive};
use deploy_hub::error::DeployError;
use deploy_hub::exclude::ExclusionSet;
use deploy_hub::target::LocalStep;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn sample_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "app.py", "print('hi')\n");
    write(root, "requirements.txt", "flask\n");
    write(root, "templates/index.html", "<html></html>\n");
    write(root, "app/models.pyc", "bytecode");
    write(root, ".git/HEAD", "ref: refs/heads/main\n");
    write(root, "venv/bin/python", "#!/bin/sh\n");
    write(root, "client/src/main.js", "console.log(1)\n");
    write(root, "client/dist/bundle.js", "bundle\n");
    dir
}

/// (path, mode, is_symlink, link target) for every entry in the archive.
fn read_entries(archive: &Archive) -> Vec<(String, u32, bool, Option<String>)> {
    let file = File::open(archive.path()).unwrap();
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.entries()
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            let header = e.header();
            let path = e.path().unwrap().to_string_lossy().trim_end_matches('/').to_string();
            let link = e
                .link_name()
                .unwrap()
                .map(|l| l.to_string_lossy().into_owned());
            (
                path,
                header.mode().unwrap(),
                header.entry_type().is_symlink(),
                link,
            )
        })
        .collect()
}

#[test]
fn test_excluded_paths_are_absent() {
    let src = sample_tree();
    let rules = ExclusionSet::from_patterns([".git/", "venv/", "*.pyc", "client/src/"]);

    let packed = archive::build(src.path(), &rules).unwrap();
    let names: Vec<String> = read_entries(&packed).into_iter().map(|e| e.0).collect();

    assert!(names.contains(&"app.py".to_string()));
    assert!(names.contains(&"templates/index.html".to_string()));
    assert!(names.contains(&"client/dist/bundle.js".to_string()));
    assert!(!names.iter().any(|n| n.starts_with(".git")));
    assert!(!names.iter().any(|n| n.starts_with("venv")));
    assert!(!names.iter().any(|n| n.ends_with(".pyc")));
    assert!(!names.iter().any(|n| n.starts_with("client/src")));

    assert_eq!(packed.entries(), names.as_slice());
    assert!(packed.file_name().starts_with("deploy_"));
    assert!(packed.file_name().ends_with(".tar.gz"));
    assert!(packed.size_bytes() > 0);
}

#[test]
fn test_entries_are_sorted_depth_first() {
    let src = sample_tree();
    let packed = archive::build(src.path(), &ExclusionSet::from_patterns([".git/"])).unwrap();

    let entries = packed.entries();
    let app = entries.iter().position(|e| e == "app").unwrap();
    let model = entries.iter().position(|e| e == "app/models.pyc").unwrap();
    let app_py = entries.iter().position(|e| e == "app.py").unwrap();
    assert!(app < model);
    assert!(model < app_py);
}

#[test]
fn test_missing_source() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    match archive::build(&missing, &ExclusionSet::default()) {
        Err(DeployError::SourceNotFound(path)) => assert_eq!(path, missing),
        other => panic!("expected SourceNotFound, got {other:?}"),
    }
}

#[test]
fn test_archive_removed_on_drop() {
    let src = sample_tree();
    let packed = archive::build(src.path(), &ExclusionSet::default()).unwrap();
    let path = packed.path().to_path_buf();
    assert!(path.exists());
    drop(packed);
    assert!(!path.exists());
    assert!(!path.parent().unwrap().exists());
}

#[cfg(unix)]
#[test]
fn test_permission_bits_preserved() {
    use std::os::unix::fs::PermissionsExt;

    let src = sample_tree();
    let script = src.path().join("run.sh");
    fs::write(&script, "#!/bin/sh\necho ok\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    fs::set_permissions(src.path().join("app.py"), fs::Permissions::from_mode(0o644)).unwrap();

    let packed = archive::build(src.path(), &ExclusionSet::default()).unwrap();
    let entries = read_entries(&packed);

    let mode_of = |name: &str| entries.iter().find(|e| e.0 == name).unwrap().1 & 0o777;
    assert_eq!(mode_of("run.sh"), 0o755);
    assert_eq!(mode_of("app.py"), 0o644);
}

#[cfg(unix)]
#[test]
fn test_symlinks_inside_kept_outside_skipped() {
    use std::os::unix::fs::symlink;

    let src = sample_tree();
    let outside = tempfile::tempdir().unwrap();
    fs::write(outside.path().join("secret.txt"), "secret").unwrap();

    symlink("templates/index.html", src.path().join("index.html")).unwrap();
    symlink(outside.path().join("secret.txt"), src.path().join("secret.txt")).unwrap();
    symlink("does-not-exist", src.path().join("dangling")).unwrap();

    let packed = archive::build(src.path(), &ExclusionSet::default()).unwrap();
    let entries = read_entries(&packed);

    let inside = entries.iter().find(|e| e.0 == "index.html").unwrap();
    assert!(inside.2, "internal link stored as a link");
    assert_eq!(inside.3.as_deref(), Some("templates/index.html"));

    assert!(!entries.iter().any(|e| e.0 == "secret.txt"));
    assert!(!entries.iter().any(|e| e.0 == "dangling"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_steps_stop_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("second-ran");

    let steps = vec![
        LocalStep {
            command: "echo building >&2; exit 3".to_string(),
            cwd: dir.path().to_path_buf(),
            description: "build".to_string(),
        },
        LocalStep {
            command: format!("touch {}", marker.display()),
            cwd: dir.path().to_path_buf(),
            description: "after".to_string(),
        },
    ];

    match archive::run_local_steps(&steps, Duration::from_secs(10)).await {
        Err(DeployError::PreSync {
            exit_code, output, ..
        }) => {
            assert_eq!(exit_code, 3);
            assert_eq!(output, "building");
        }
        other => panic!("expected PreSync, got {other:?}"),
    }
    assert!(!marker.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_steps_run_in_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![LocalStep {
        command: "touch built.flag".to_string(),
        cwd: dir.path().to_path_buf(),
        description: "build".to_string(),
    }];
    archive::run_local_steps(&steps, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(dir.path().join("built.flag").exists());
}
