//! MT7927 register map
//!
//! Offsets are either local BAR0 offsets (below [`DIRECT_THRESHOLD`]) or
//! logical chip addresses that go through [`crate::translate`].

use bitflags::bitflags;

pub const fn bit(n: u32) -> u32 {
    1 << n
}

pub const fn genmask(high: u32, low: u32) -> u32 {
    (u32::MAX >> (31 - high)) & (u32::MAX << low)
}

/// Extract a field described by `mask` from `value`.
pub const fn field_get(mask: u32, value: u32) -> u32 {
    (value & mask) >> mask.trailing_zeros()
}

/// Place `value` into the field described by `mask`.
pub const fn field_prep(mask: u32, value: u32) -> u32 {
    (value << mask.trailing_zeros()) & mask
}

// =============================================================================
// Chip identity
// =============================================================================

pub const MT7927_CHIP_ID: u32 = 0x0051_1163;
/// Local offset holding the chip id.
pub const MT_CHIP_ID: u32 = 0x1_0000;
/// Value every read returns once the device dropped off the bus.
pub const MT_DEAD: u32 = 0xffff_ffff;

// =============================================================================
// Host interface remap
// =============================================================================

/// Addresses below this are plain BAR0 offsets.
pub const DIRECT_THRESHOLD: u32 = 0x20_0000;
/// Size of the locally mapped BAR0 window.
pub const BAR0_SIZE: u32 = 0x20_0000;

pub const MT_HIF_REMAP_L1: u32 = 0x15_5024;
pub const MT_HIF_REMAP_L1_MASK: u32 = genmask(31, 16);
pub const MT_HIF_REMAP_L1_OFFSET: u32 = genmask(15, 0);
pub const MT_HIF_REMAP_L1_BASE: u32 = genmask(31, 16);
pub const MT_HIF_REMAP_BASE_L1: u32 = 0x13_0000;

pub const MT_HIF_REMAP_L2: u32 = 0x0120;
pub const MT_HIF_REMAP_BASE_L2: u32 = 0x1850_0000;

/// Logical ranges served by the L1 aperture, `[start, end)`.
pub const REMAP_L1_RANGES: [(u32, u32); 3] = [
    (0x1800_0000, 0x18c0_0000),
    (0x7000_0000, 0x7800_0000),
    (0x7c00_0000, 0x7c40_0000),
];

pub const CB_INFRA_PCIE_REMAP_WF: u32 = 0x1f_6554;
pub const CB_INFRA_PCIE_REMAP_WF_VALUE: u32 = 0x7403_7001;
pub const CB_INFRA_PCIE_REMAP_WF_BT: u32 = 0x1f_6558;
pub const CB_INFRA_PCIE_REMAP_WF_BT_VALUE: u32 = 0x7000_7000;

pub const MT_PCIE_MAC_PM: u32 = 0x7403_0194;
pub const MT_PCIE_MAC_PM_L0S_DIS: u32 = bit(8);

pub const MT_SWDEF_BASE: u32 = 0x0040_1400;
pub const MT_SWDEF_MODE: u32 = MT_SWDEF_BASE + 0x3c;
pub const MT_SWDEF_NORMAL_MODE: u32 = 0;

/// Scratch register the host uses to flag software init completion.
pub const MT_WFDMA_DUMMY_CR: u32 = 0x5400_0120;
pub const MT_WFDMA_SW_INIT_DONE: u32 = bit(0);

// =============================================================================
// Power ownership and reset
// =============================================================================

pub const MT_CONN_ON_LPCTL: u32 = 0x7c06_0010;

bitflags! {
    /// `CONN_ON_LPCTL` command/status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lpctl: u32 {
        /// Hand ownership to the firmware.
        const HOST_SET_OWN = bit(0);
        /// Claim ownership for the driver.
        const HOST_CLR_OWN = bit(1);
        /// Set while the firmware owns the shared resources.
        const OWN_SYNC = bit(2);
    }
}

pub const MT_WFSYS_SW_RST_B: u32 = 0x7c00_0140;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WfsysReset: u32 {
        const RST_B_EN = bit(0);
        const INIT_DONE = bit(4);
    }
}

pub const MT_CONN_ON_MISC: u32 = 0x7c06_00f0;
pub const MT_TOP_MISC2_FW_N9_RDY: u32 = genmask(1, 0);

pub const MT_MCU_STATUS: u32 = 0x7c06_0204;

/// ROM code progress register. Reads [`MCU_IDLE`] in its low half once the
/// boot ROM waits for a download.
pub const MT_MCU_ROMCODE_INDEX: u32 = 0x8102_1604;
pub const MCU_IDLE: u32 = 0x1d1e;
pub const MCU_IDLE_MASK: u32 = genmask(15, 0);

// =============================================================================
// WFDMA0
// =============================================================================

/// Logical base of the host WFDMA0 block (local `0xd4000`).
pub const MT_WFDMA0_BASE: u32 = 0x7c02_4000;

pub const fn wfdma0(offset: u32) -> u32 {
    MT_WFDMA0_BASE + offset
}

pub const MT_WFDMA0_RST: u32 = wfdma0(0x100);
pub const MT_WFDMA0_RST_LOGIC_RST: u32 = bit(4);
pub const MT_WFDMA0_RST_DMASHDL_ALL_RST: u32 = bit(5);

pub const MT_HOST2MCU_SW_INT_SET: u32 = wfdma0(0x108);
/// Doorbell bit that wakes the MCU supervisor to re-scan its rings.
pub const MT_HOST2MCU_WAKE: u32 = bit(0);

pub const MT_WFDMA0_MCU_INT_STA: u32 = wfdma0(0x110);
pub const MT_MCU_INT_MEM_ERR: u32 = bit(0);
pub const MT_MCU_INT_DMA_ERR: u32 = bit(1);

pub const MT_MCU2HOST_SW_INT_ENA: u32 = wfdma0(0x1f4);
pub const MT_MCU_CMD_WAKE_RX_PCIE: u32 = bit(0);

pub const MT_WFDMA0_HOST_INT_STA: u32 = wfdma0(0x200);
pub const MT_WFDMA0_HOST_INT_ENA: u32 = wfdma0(0x204);
pub const MT_WFDMA0_GLO_CFG: u32 = wfdma0(0x208);
pub const MT_WFDMA0_RST_DTX_PTR: u32 = wfdma0(0x20c);
pub const MT_WFDMA0_HOST_INT_DIS: u32 = wfdma0(0x22c);
pub const MT_WFDMA0_RST_DRX_PTR: u32 = wfdma0(0x280);
pub const MT_WFDMA0_PRI_DLY_INT_CFG0: u32 = wfdma0(0x2f0);

bitflags! {
    /// `WFDMA0_GLO_CFG`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GloCfg: u32 {
        const TX_DMA_EN = bit(0);
        const TX_DMA_BUSY = bit(1);
        const RX_DMA_EN = bit(2);
        const RX_DMA_BUSY = bit(3);
        const PDMA_BT_SIZE = 3 << 4;
        const TX_WB_DDONE = bit(6);
        const CSR_AXI_BUFRDY_BYP = bit(11);
        const FIFO_LITTLE_ENDIAN = bit(12);
        const CSR_RX_WB_DDONE = bit(13);
        const CSR_DISP_BASE_PTR_CHAIN_EN = bit(15);
        const CSR_LBK_RX_Q_SEL_EN = bit(20);
        const OMIT_RX_INFO_PFET2 = bit(21);
        const OMIT_TX_INFO = bit(28);
        const CLK_GATE_DIS = bit(30);
    }
}

impl GloCfg {
    /// Static configuration written with both DMA directions disabled.
    pub const SETUP: GloCfg = GloCfg::PDMA_BT_SIZE
        .union(GloCfg::TX_WB_DDONE)
        .union(GloCfg::CSR_AXI_BUFRDY_BYP)
        .union(GloCfg::FIFO_LITTLE_ENDIAN)
        .union(GloCfg::CSR_RX_WB_DDONE)
        .union(GloCfg::CSR_DISP_BASE_PTR_CHAIN_EN)
        .union(GloCfg::CSR_LBK_RX_Q_SEL_EN)
        .union(GloCfg::OMIT_RX_INFO_PFET2)
        .union(GloCfg::OMIT_TX_INFO)
        .union(GloCfg::CLK_GATE_DIS);

    pub const DMA_EN: GloCfg = GloCfg::TX_DMA_EN.union(GloCfg::RX_DMA_EN);
}

/// Per-ring register offsets inside a ring's 16-byte control block.
pub const RING_BASE: u32 = 0x0;
pub const RING_CNT: u32 = 0x4;
pub const RING_CIDX: u32 = 0x8;
pub const RING_DIDX: u32 = 0xc;

pub const fn tx_ring(n: u8) -> u32 {
    wfdma0(0x300) + n as u32 * 0x10
}

pub const fn rx_ring(n: u8) -> u32 {
    wfdma0(0x500) + n as u32 * 0x10
}

pub const fn tx_ring_ext_ctrl(n: u8) -> u32 {
    wfdma0(0x600) + n as u32 * 0x4
}

pub const fn rx_ring_ext_ctrl(n: u8) -> u32 {
    wfdma0(0x680) + n as u32 * 0x4
}

/// Prefetch control word: SRAM base in the high half, depth in the low half.
pub const fn prefetch(base: u16, depth: u16) -> u32 {
    (base as u32) << 16 | depth as u32
}

/// Bulk pointer reset value covering every ring.
pub const RST_ALL_RINGS: u32 = 0xffff_ffff;

// =============================================================================
// Interrupt status
// =============================================================================

pub const fn int_tx_done(n: u32) -> u32 {
    bit(n)
}

pub const fn int_rx_done(n: u32) -> u32 {
    bit(16 + n)
}

pub const MT_INT_TX_DONE_MCU_WM: u32 = bit(25);
pub const MT_INT_TX_DONE_FWDL: u32 = bit(26);
pub const MT_INT_MCU_CMD: u32 = bit(29);

// =============================================================================
// Fixed map
// =============================================================================

/// A chip address range that is directly visible in BAR0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRegion {
    pub physical_base: u32,
    pub local_base: u32,
    pub size: u32,
}

impl RegisterRegion {
    const fn new(physical_base: u32, local_base: u32, size: u32) -> Self {
        Self {
            physical_base,
            local_base,
            size,
        }
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.physical_base && addr - self.physical_base < self.size
    }

    pub fn contains_local(&self, offset: u32) -> bool {
        offset >= self.local_base && offset - self.local_base < self.size
    }
}

/// Chip address ranges with a fixed BAR0 mapping, first match wins.
pub static FIXED_MAP: [RegisterRegion; 51] = [
    RegisterRegion::new(0x830c_0000, 0x00_0000, 0x1000), // WF_MCU_BUS_CR_REMAP
    RegisterRegion::new(0x5400_0000, 0x00_2000, 0x1000), // WFDMA PCIE0 MCU DMA0
    RegisterRegion::new(0x5500_0000, 0x00_3000, 0x1000), // WFDMA PCIE0 MCU DMA1
    RegisterRegion::new(0x5600_0000, 0x00_4000, 0x1000), // WFDMA reserved
    RegisterRegion::new(0x5700_0000, 0x00_5000, 0x1000), // WFDMA MCU wrap CR
    RegisterRegion::new(0x5800_0000, 0x00_6000, 0x1000), // WFDMA PCIE1 MCU DMA0
    RegisterRegion::new(0x5900_0000, 0x00_7000, 0x1000), // WFDMA PCIE1 MCU DMA1
    RegisterRegion::new(0x820c_0000, 0x00_8000, 0x4000), // WF_UMAC_TOP (PLE)
    RegisterRegion::new(0x820c_8000, 0x00_c000, 0x2000), // WF_UMAC_TOP (PSE)
    RegisterRegion::new(0x820c_c000, 0x00_e000, 0x2000), // WF_UMAC_TOP (PP)
    RegisterRegion::new(0x7403_0000, 0x01_0000, 0x1000), // PCIe MAC
    RegisterRegion::new(0x820e_0000, 0x02_0000, 0x0400), // WF_LMAC_TOP BN0 (CFG)
    RegisterRegion::new(0x820e_1000, 0x02_0400, 0x0200), // WF_LMAC_TOP BN0 (TRB)
    RegisterRegion::new(0x820e_2000, 0x02_0800, 0x0400), // WF_LMAC_TOP BN0 (AGG)
    RegisterRegion::new(0x820e_3000, 0x02_0c00, 0x0400), // WF_LMAC_TOP BN0 (ARB)
    RegisterRegion::new(0x820e_4000, 0x02_1000, 0x0400), // WF_LMAC_TOP BN0 (TMAC)
    RegisterRegion::new(0x820e_5000, 0x02_1400, 0x0800), // WF_LMAC_TOP BN0 (RMAC)
    RegisterRegion::new(0x820c_e000, 0x02_1c00, 0x0200), // WF_LMAC_TOP (WTBL)
    RegisterRegion::new(0x820e_7000, 0x02_1e00, 0x0200), // WF_LMAC_TOP BN0 (DMA)
    RegisterRegion::new(0x820c_f000, 0x02_2000, 0x1000), // WF_LMAC_TOP (WTBL)
    RegisterRegion::new(0x820e_9000, 0x02_3400, 0x0200), // WF_LMAC_TOP BN0 (WTBLOFF)
    RegisterRegion::new(0x820e_a000, 0x02_4000, 0x0200), // WF_LMAC_TOP BN0 (ETBF)
    RegisterRegion::new(0x820e_b000, 0x02_4200, 0x0400), // WF_LMAC_TOP BN0 (LPON)
    RegisterRegion::new(0x820e_c000, 0x02_4600, 0x0200), // WF_LMAC_TOP BN0 (INT)
    RegisterRegion::new(0x820e_d000, 0x02_4800, 0x0800), // WF_LMAC_TOP BN0 (MIB)
    RegisterRegion::new(0x820c_a000, 0x02_6000, 0x2000), // WF_LMAC_TOP BN0 (MUCOP)
    RegisterRegion::new(0x820d_0000, 0x03_0000, 0x10000), // WF_LMAC_TOP (WTBLON)
    RegisterRegion::new(0x4000_0000, 0x07_0000, 0x10000), // WF_UMAC_SYSRAM
    RegisterRegion::new(0x0040_0000, 0x08_0000, 0x10000), // WF_MCU_SYSRAM
    RegisterRegion::new(0x0041_0000, 0x09_0000, 0x10000), // WF_MCU_SYSRAM (configure register)
    RegisterRegion::new(0x820f_0000, 0x0a_0000, 0x0400), // WF_LMAC_TOP BN1 (CFG)
    RegisterRegion::new(0x820f_1000, 0x0a_0600, 0x0200), // WF_LMAC_TOP BN1 (TRB)
    RegisterRegion::new(0x820f_2000, 0x0a_0800, 0x0400), // WF_LMAC_TOP BN1 (AGG)
    RegisterRegion::new(0x820f_3000, 0x0a_0c00, 0x0400), // WF_LMAC_TOP BN1 (ARB)
    RegisterRegion::new(0x820f_4000, 0x0a_1000, 0x0400), // WF_LMAC_TOP BN1 (TMAC)
    RegisterRegion::new(0x820f_5000, 0x0a_1400, 0x0800), // WF_LMAC_TOP BN1 (RMAC)
    RegisterRegion::new(0x820f_7000, 0x0a_1e00, 0x0200), // WF_LMAC_TOP BN1 (DMA)
    RegisterRegion::new(0x820f_9000, 0x0a_3400, 0x0200), // WF_LMAC_TOP BN1 (WTBLOFF)
    RegisterRegion::new(0x820f_a000, 0x0a_4000, 0x0200), // WF_LMAC_TOP BN1 (ETBF)
    RegisterRegion::new(0x820f_b000, 0x0a_4200, 0x0400), // WF_LMAC_TOP BN1 (LPON)
    RegisterRegion::new(0x820f_c000, 0x0a_4600, 0x0200), // WF_LMAC_TOP BN1 (INT)
    RegisterRegion::new(0x820f_d000, 0x0a_4800, 0x0800), // WF_LMAC_TOP BN1 (MIB)
    RegisterRegion::new(0x820c_4000, 0x0a_8000, 0x4000), // WF_LMAC_TOP (MUVOP)
    RegisterRegion::new(0x820b_0000, 0x0a_e000, 0x1000), // [APB2] WFSYS_ON
    RegisterRegion::new(0x8002_0000, 0x0b_0000, 0x10000), // WF_TOP_MISC_OFF
    RegisterRegion::new(0x8102_0000, 0x0c_0000, 0x10000), // WF_TOP_MISC_ON
    RegisterRegion::new(0x7c02_0000, 0x0d_0000, 0x10000), // CONN_INFRA, wfdma
    RegisterRegion::new(0x7c06_0000, 0x0e_0000, 0x10000), // CONN_INFRA, conn_host_csr_top
    RegisterRegion::new(0x7c00_0000, 0x0f_0000, 0x10000), // CONN_INFRA
    RegisterRegion::new(0x7002_0000, 0x1f_0000, 0x10000), // CBTOP
    RegisterRegion::new(0x7c50_0000, 0x06_0000, 0x2000000), // remap
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genmask() {
        assert_eq!(genmask(31, 16), 0xffff_0000);
        assert_eq!(genmask(29, 16), 0x3fff_0000);
        assert_eq!(genmask(13, 0), 0x3fff);
        assert_eq!(genmask(1, 0), 0x3);
    }

    #[test]
    fn test_field_helpers() {
        assert_eq!(field_prep(genmask(29, 16), 64), 0x0040_0000);
        assert_eq!(field_get(genmask(29, 16), 0x4040_0000), 64);
        assert_eq!(field_prep(MT_HIF_REMAP_L1_MASK, 0x7c02), 0x7c02_0000);
    }

    #[test]
    fn test_wfdma_layout() {
        assert_eq!(MT_WFDMA0_GLO_CFG, 0x7c02_4208);
        assert_eq!(tx_ring(15), 0x7c02_43f0);
        assert_eq!(tx_ring(16), 0x7c02_4400);
        assert_eq!(tx_ring_ext_ctrl(16), 0x7c02_4640);
        assert_eq!(prefetch(0x0540, 0x4), 0x0540_0004);
    }

    #[test]
    fn test_glo_cfg_setup_excludes_enables() {
        assert!(!GloCfg::SETUP.intersects(GloCfg::DMA_EN));
        assert!(GloCfg::SETUP.contains(GloCfg::CLK_GATE_DIS));
        assert_eq!(GloCfg::SETUP.bits(), 0x5030_b870);
    }

    #[test]
    fn test_fixed_map_local_ranges_fit_bar() {
        for region in FIXED_MAP.iter().filter(|r| r.physical_base != 0x7c50_0000) {
            assert!(region.local_base + region.size <= BAR0_SIZE, "{:x?}", region);
        }
    }
}
