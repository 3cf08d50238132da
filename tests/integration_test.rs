use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use trdp_core::config::{
    Config, ComIdDatasetMap, DatasetConfig, DatasetElementConfig, ExchgPar, InterfaceConfig,
    MdPar, MemoryConfig, PdPar,
};
use trdp_core::constant::{PREALLOC_BLOCK_SIZES, SubnetId, ToBehavior};
use trdp_core::taul::Taul;

const COM_ID: u32 = 10001;
const DATASET_ID: u32 = 1001;

fn loopback_config(subnet1_ip: Ipv4Addr, subnet2_ip: Ipv4Addr) -> Config {
    Config {
        memory: MemoryConfig {
            size: 4096,
            prealloc: [0; PREALLOC_BLOCK_SIZES.len()],
        },
        debug: None,
        interfaces: vec![
            InterfaceConfig {
                name: "lo1".into(),
                subnet: SubnetId::Subnet1,
                host_ip: u32::from(subnet1_ip),
                leader_ip: 0,
                sdt: None,
            },
            InterfaceConfig {
                name: "lo2".into(),
                subnet: SubnetId::Subnet2,
                host_ip: u32::from(subnet2_ip),
                leader_ip: 0,
                sdt: None,
            },
        ],
        com_pars: vec![],
        datasets: vec![DatasetConfig {
            dataset_id: DATASET_ID,
            elements: vec![DatasetElementConfig {
                type_name: "UINT32".into(),
                count: 1,
            }],
        }],
        com_id_map: vec![ComIdDatasetMap {
            com_id: COM_ID,
            dataset_id: DATASET_ID,
        }],
        exchanges: vec![ExchgPar {
            com_id: COM_ID,
            com_par_id: 1,
            dataset_id: DATASET_ID,
            pd: Some(PdPar {
                cycle: Duration::from_millis(20),
                timeout: Duration::from_millis(200),
                to_behavior: ToBehavior::Zero,
                redundant: false,
            }),
            md: Some(MdPar {
                reply_timeout: Duration::from_secs(1),
                confirm_timeout: Duration::from_secs(1),
                num_sessions: 4,
                tcp: false,
            }),
        }],
    }
}

// S1: a publisher's cyclic PD reaches a subscriber's Traffic Store over
// loopback within a couple of cycle periods.
#[test]
fn s1_publisher_reaches_subscriber_over_loopback() {
    let publisher_side = Taul::init(loopback_config(
        Ipv4Addr::new(127, 0, 0, 1),
        Ipv4Addr::new(127, 0, 0, 2),
    ))
    .expect("init publisher side");
    let subscriber_side = Taul::init(loopback_config(
        Ipv4Addr::new(127, 0, 0, 3),
        Ipv4Addr::new(127, 0, 0, 4),
    ))
    .expect("init subscriber side");

    {
        let mut guard = publisher_side.lock();
        guard.write(0x100, &42u32.to_be_bytes());
    }

    let pub_handle = publisher_side
        .publish(
            COM_ID,
            u32::from(Ipv4Addr::new(127, 0, 0, 3)),
            SubnetId::Subnet1,
            0x100,
            4,
        )
        .expect("publish");
    let sub_handle = subscriber_side
        .subscribe(COM_ID, 0, 0, 0, SubnetId::Subnet1, 0x100, 4, 0)
        .expect("subscribe");

    thread::sleep(Duration::from_millis(150));

    let mut received = [0u8; 4];
    subscriber_side.lock().read(0x100, &mut received);
    assert_eq!(u32::from_be_bytes(received), 42);

    publisher_side.unpublish(pub_handle).unwrap();
    subscriber_side.unsubscribe(sub_handle).unwrap();
    publisher_side.terminate();
    subscriber_side.terminate();
}

#[test]
fn notify_does_not_require_a_listener() {
    let taul = Taul::init(loopback_config(
        Ipv4Addr::new(127, 0, 0, 5),
        Ipv4Addr::new(127, 0, 0, 6),
    ))
    .expect("init");

    taul.notify(
        COM_ID,
        u32::from(Ipv4Addr::new(127, 0, 0, 5)),
        None,
        SubnetId::Subnet1,
        &[1, 2, 3, 4],
    )
    .expect("notify");

    taul.terminate();
}
