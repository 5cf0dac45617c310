//! 并行构造夹具时，临时 UNIX 套接字路径两两不同。

use std::{collections::HashSet, thread};

use spark_e2e::{E2eConfig, unique};

const THREADS: usize = 16;
const PER_THREAD: usize = 256;

#[test]
fn parallel_uds_names_are_distinct() {
    let dir = E2eConfig::default().uds_temp_dir;
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let dir = dir.clone();
            thread::spawn(move || {
                (0..PER_THREAD)
                    .flat_map(|_| {
                        let names = unique::global();
                        [names.uds_uri(&dir), names.uds_uri_percent_encoded(&dir)]
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for name in handle.join().expect("name generator thread") {
            assert!(seen.insert(name.clone()), "duplicate socket path {name}");
        }
    }
    assert_eq!(seen.len(), THREADS * PER_THREAD * 2);
}

#[cfg(unix)]
#[test]
fn parallel_uds_fixtures_bind_distinct_paths() {
    use spark_e2e::fixture::fullstack::{FullstackFixture, ListenAddress};

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            thread::spawn(|| {
                let fixture = FullstackFixture::uds(false).expect("uds fixture");
                match fixture.listen_address() {
                    ListenAddress::Unix(path) => path.clone(),
                    other => panic!("unexpected listen address {other:?}"),
                }
            })
        })
        .collect();

    let paths: HashSet<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("fixture thread"))
        .collect();
    assert_eq!(paths.len(), THREADS);
}
