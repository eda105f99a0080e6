mod common;

use common::{fast_config, sim_context};
use mt7927::regs::{
    rx_ring, tx_ring, tx_ring_ext_ctrl, GloCfg, MT_CHIP_ID, MT_WFDMA0_GLO_CFG,
    MT_WFDMA0_HOST_INT_ENA, RING_BASE, RING_CIDX, RING_CNT,
};
use mt7927::{BringupState, Error};

#[test]
fn test_sequence_reaches_ready() {
    let (_sim, _dma, mut ctx) = sim_context(fast_config());
    assert_eq!(ctx.sequence().unwrap(), BringupState::Ready);
    assert_eq!(ctx.state(), BringupState::Ready);
}

#[test]
fn test_rom_never_idle_times_out_before_rings() {
    let (sim, _dma, mut ctx) = sim_context(fast_config());
    sim.configure(|b| b.rom_idle_after = None);

    match ctx.sequence() {
        Err(Error::Timeout { what, iterations, .. }) => {
            assert!(what.contains("ROMCODE_INDEX"), "{what}");
            assert_eq!(iterations, 10);
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(ctx.state(), BringupState::Failed);

    assert!(matches!(
        ctx.configure_rings(),
        Err(Error::InvalidState {
            actual: BringupState::Failed,
            ..
        })
    ));

    let ring_space = tx_ring(0)..rx_ring(16);
    assert!(sim.writes().iter().all(|(addr, _)| !ring_space.contains(addr)));
    assert!(sim.writes_to(MT_WFDMA0_GLO_CFG).is_empty());
}

#[test]
fn test_ownership_handshake_timeout() {
    let (sim, _dma, mut ctx) = sim_context(fast_config());
    sim.configure(|b| b.ownership_responds = false);

    match ctx.sequence() {
        Err(Error::Timeout { what, .. }) => assert!(what.contains("OWN_SYNC set"), "{what}"),
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(ctx.state(), BringupState::Failed);
}

#[test]
fn test_hung_device_is_reported() {
    let (sim, _dma, mut ctx) = sim_context(fast_config());
    sim.configure(|b| b.hung = true);

    let err = ctx.sequence().unwrap_err();
    assert!(matches!(err, Error::DeviceHung { addr: MT_CHIP_ID }));
    assert!(err.needs_bus_reset());
    assert_eq!(ctx.state(), BringupState::Failed);
}

#[test]
fn test_every_ring_has_a_base_after_configure() {
    let (sim, _dma, mut ctx) = sim_context(fast_config());
    ctx.sequence().unwrap();
    ctx.configure_rings().unwrap();
    assert_eq!(ctx.state(), BringupState::RingsConfigured);

    let rings = ctx.rings().unwrap();
    assert_eq!(rings.tx_rings().len(), 17);
    assert_eq!(rings.tx_rings().iter().filter(|r| r.role().carries_traffic()).count(), 2);
    for ring in rings.tx_rings() {
        let base = ctx.read(ring.regs() + RING_BASE).unwrap();
        let cnt = ctx.read(ring.regs() + RING_CNT).unwrap();
        assert_ne!(base, 0, "ring {} has no base", ring.index());
        assert!(cnt > 0, "ring {} has no capacity", ring.index());
    }

    for index in [15, 16] {
        assert_ne!(ctx.read(tx_ring_ext_ctrl(index)).unwrap(), 0);
    }
    assert!(sim.dropped_writes().is_empty());
}

#[test]
fn test_glo_cfg_write_order() {
    let (sim, _dma, mut ctx) = sim_context(fast_config());
    ctx.sequence().unwrap();
    ctx.configure_rings().unwrap();

    assert_eq!(
        sim.writes_to(MT_WFDMA0_GLO_CFG),
        vec![
            0,
            GloCfg::CLK_GATE_DIS.bits(),
            GloCfg::SETUP.bits(),
            (GloCfg::SETUP | GloCfg::TX_DMA_EN).bits(),
        ]
    );

    // No ring register was written before the clock gate opened.
    let writes = sim.writes();
    let gate_open = writes
        .iter()
        .position(|&(addr, value)| {
            addr == MT_WFDMA0_GLO_CFG && value == GloCfg::CLK_GATE_DIS.bits()
        })
        .unwrap();
    let first_base = writes
        .iter()
        .position(|&(addr, _)| addr == tx_ring(0) + RING_BASE)
        .unwrap();
    assert!(gate_open < first_base);

    assert_ne!(sim.peek(MT_WFDMA0_HOST_INT_ENA), 0);
}

#[test]
fn test_rx_rings_enable_rx_last() {
    let (sim, _dma, mut ctx) = sim_context(fast_config());
    ctx.sequence().unwrap();
    ctx.configure_rings().unwrap();
    ctx.configure_rx_rings().unwrap();

    let config = ctx.config().rings.clone();
    for n in 0..config.rx_rings {
        assert_ne!(ctx.read(rx_ring(n) + RING_BASE).unwrap(), 0);
        assert_eq!(ctx.read(rx_ring(n) + RING_CIDX).unwrap(), config.rx_capacity as u32 - 1);
    }
    assert!(sim.dropped_writes().is_empty());
    assert_eq!(
        sim.writes_to(MT_WFDMA0_GLO_CFG).last(),
        Some(&(GloCfg::SETUP | GloCfg::DMA_EN).bits())
    );
    assert!(ctx.rings().unwrap().rx_configured());
}

#[test]
fn test_rx_rings_need_tx_first() {
    let (_sim, _dma, mut ctx) = sim_context(fast_config());
    ctx.sequence().unwrap();
    assert!(matches!(ctx.configure_rx_rings(), Err(Error::InvalidState { .. })));
}

#[test]
fn test_teardown_then_sequence_again() {
    let (_sim, dma, mut ctx) = sim_context(fast_config());
    ctx.sequence().unwrap();
    ctx.configure_rings().unwrap();

    ctx.teardown();
    assert_eq!(dma.live_allocations(), 0);
    assert_eq!(ctx.state(), BringupState::Idle);

    assert_eq!(ctx.sequence().unwrap(), BringupState::Ready);
    ctx.configure_rings().unwrap();
}

#[test]
fn test_status_snapshot() {
    let (_sim, _dma, mut ctx) = sim_context(fast_config());
    ctx.sequence().unwrap();
    ctx.configure_rings().unwrap();

    let status = ctx.status().unwrap();
    assert_eq!(status.state, "RingsConfigured");
    assert_eq!(status.romcode_index & 0xffff, 0x1d1e);
    assert_eq!(status.glo_cfg, (GloCfg::SETUP | GloCfg::TX_DMA_EN).bits());
    let indices: Vec<u8> = status.rings.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![15, 16]);
}
