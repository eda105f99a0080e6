use mt7927::regs::{MT_HIF_REMAP_L1, MT_HIF_REMAP_L2};
use mt7927::sim::SimDevice;
use mt7927::translate::Route;
use mt7927::{AddressTranslator, Error, RegisterBus};
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_low_addresses_pass_through(addr in (0u32..0x20_0000 / 4).prop_map(|n| n * 4)) {
        let translation = AddressTranslator::new().translate(addr).unwrap();
        prop_assert_eq!(translation.offset, addr);
        prop_assert_eq!(translation.route, Route::Direct);
    }

    #[test]
    fn test_unaligned_is_out_of_range(
        addr in any::<u32>().prop_filter("unaligned", |a| a % 4 != 0),
    ) {
        let result = AddressTranslator::new().translate(addr);
        prop_assert!(matches!(result, Err(Error::AddressOutOfRange(a)) if a == addr));
    }

    #[test]
    fn test_l1_access_restores_selector(
        l1 in any::<u32>(),
        l2 in any::<u32>(),
        addr in (0x7c10_0000u32..0x7c40_0000).prop_map(|a| a & !3),
        value in any::<u32>(),
    ) {
        let sim = SimDevice::new();
        sim.write(MT_HIF_REMAP_L1, l1);
        sim.write(MT_HIF_REMAP_L2, l2);

        let translator = AddressTranslator::new();
        translator.write(&sim, addr, value).unwrap();
        prop_assert_eq!(sim.selectors(), (l1, l2));
        prop_assert_eq!(sim.peek(addr), value);
        prop_assert_eq!(translator.read(&sim, addr).unwrap(), value);
        prop_assert_eq!(sim.selectors(), (l1, l2));
    }

    #[test]
    fn test_l2_access_restores_both_selectors(
        l1 in any::<u32>(),
        l2 in any::<u32>(),
        addr in (0x8800_0000u32..0x8900_0000).prop_map(|a| a & !3),
        value in any::<u32>(),
    ) {
        let sim = SimDevice::new();
        sim.write(MT_HIF_REMAP_L1, l1);
        sim.write(MT_HIF_REMAP_L2, l2);

        let translator = AddressTranslator::new();
        translator.write(&sim, addr, value).unwrap();
        prop_assert_eq!(sim.selectors(), (l1, l2));
        prop_assert_eq!(translator.read(&sim, addr).unwrap(), value);
        prop_assert_eq!(translator.stats().l2_accesses, 2);
    }
}
