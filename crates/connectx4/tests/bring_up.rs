//! End-to-end bring-up against the in-process firmware stub: the exact
//! opcode trace, capability-limit rejection, and graceful teardown.

use connectx4::bringup;
use connectx4::config::Config;
use connectx4_testkit::{FirmwareOverrides, Harness, NullLink};

const GOLDEN_TRACE: &[(u16, u16)] = &[
    (0x104, 0), // ENABLE_HCA
    (0x10B, 0), // SET_ISSI
    (0x107, 1), // QUERY_PAGES (boot)
    (0x108, 1), // MANAGE_PAGES
    (0x107, 2), // QUERY_PAGES (init)
    (0x108, 1),
    (0x102, 0), // INIT_HCA
    (0x107, 3), // QUERY_PAGES (regular)
    (0x108, 1),
    (0x802, 0), // ALLOC_UAR
    (0x301, 0), // CREATE_EQ
    (0x800, 0), // ALLOC_PD
    (0x816, 0), // ALLOC_TRANSPORT_DOMAIN
    (0x203, 0), // QUERY_SPECIAL_CONTEXTS
    (0x912, 0), // CREATE_TIS
    (0x400, 0), // CREATE_CQ (rx)
    (0x400, 0), // CREATE_CQ (tx)
    (0x908, 0), // CREATE_RQ
    (0x904, 0), // CREATE_SQ
    (0x900, 0), // CREATE_TIR
    (0x930, 0), // CREATE_FLOW_TABLE
    (0x933, 0), // CREATE_FLOW_GROUP
    (0x936, 0), // SET_FLOW_TABLE_ENTRY
    (0x92F, 0), // SET_FLOW_TABLE_ROOT
    (0x909, 0), // MODIFY_RQ RST->RDY
    (0x905, 0), // MODIFY_SQ RST->RDY
];

#[test]
fn bring_up_issues_opcodes_in_the_exact_documented_order() {
    let mut h = Harness::new();
    let config = Config::new("0000:03:00.0");

    let objects = bringup::bring_up(&mut h.pci, &mut h.dma, h.clock, &config, false).expect("bring-up should succeed");

    assert_eq!(h.trace(), GOLDEN_TRACE);

    // S1: one EQ, two CQs, one SQ, one RQ, one TIR, one TIS, one RX flow
    // table with one entry — and the queues were sized from `config`.
    assert_eq!(objects.rq.n(), config.recvq_size);
    assert_eq!(objects.sq.n(), config.sendq_size);
    assert_ne!(objects.cq_rx.cqn, objects.cq_tx.cqn);
    assert_eq!(objects.flow_table.table_type, connectx4::commands::FlowTableType::Rx);
}

#[test]
fn bring_up_rejects_queue_depth_exceeding_firmware_limits() {
    let mut h = Harness::new();
    h.set_overrides(FirmwareOverrides { log_max_sq: Some(4), log_max_rq: Some(4), ..Default::default() });
    let mut config = Config::new("0000:03:00.0");
    config.sendq_size = 1024; // log2 = 10 > firmware's advertised limit of 4

    let result = bringup::bring_up(&mut h.pci, &mut h.dma, h.clock, &config, true);
    assert!(matches!(result, Err(connectx4::Error::Command { .. })));
}

#[test]
fn bring_up_then_teardown_runs_without_panicking() {
    let mut h = Harness::new();
    let config = Config::new("0000:03:00.0");
    let mut objects = bringup::bring_up(&mut h.pci, &mut h.dma, h.clock, &config, false).expect("bring-up should succeed");

    bringup::tear_down(&mut h.pci, &mut objects);
}

#[test]
fn empty_steady_state_push_pull_does_not_touch_the_link() {
    use nic_hal::NetworkApp;

    let h = Harness::new();
    let config = Config::new("0000:03:00.0");
    let bootstrap = connectx4::Bootstrap {
        config,
        pci: h.pci,
        dma: h.dma,
        clock: h.clock,
        rx_link: NullLink,
        tx_link: NullLink,
    };
    let mut nic = connectx4::ConnectX4Nic::new(bootstrap).expect("bring-up should succeed");
    nic.push().unwrap();
    nic.pull().unwrap();
    nic.stop().unwrap();
}
