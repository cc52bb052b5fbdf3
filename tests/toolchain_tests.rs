//! End-to-end checks over the whole toolchain: source text goes through the
//! assembler, the resulting ROM runs on the emulator, and the machine state
//! is observed.

use c8::isa::{FLAG_REG, KEY_NONE};
use c8::{assemble, Emulator};

fn boot(src: &str) -> Emulator {
    let rom = assemble(src).expect("test program should assemble");
    Emulator::with_seed(&rom, 0).expect("test ROM should fit")
}

fn run_steps(emu: &mut Emulator, n: usize) {
    for _ in 0..n {
        emu.step().expect("test program should not fault");
    }
}

#[test]
fn macro_use_is_byte_identical_to_substitution() {
    let cases = [
        ("reg", "V4", "LD reg, 1\n", "LD V4, 1\n"),
        ("count", "0x2A", "LD V1, count\n", "LD V1, 0x2A\n"),
        ("operands", "V2, V3", "ADD operands\n", "ADD V2, V3\n"),
        ("target", "main", "main: JP target\n", "main: JP main\n"),
    ];
    for (name, sub, with_macro, plain) in cases {
        let src = format!("%define {name} {sub}\n{with_macro}");
        assert_eq!(
            assemble(&src).unwrap(),
            assemble(plain).unwrap(),
            "macro {name} -> {sub}"
        );
    }
}

#[test]
fn draws_a_font_digit_onto_the_screen() {
    let mut emu = boot(concat!(
        "start: CLS\n",
        "  LD V1, 3\n",
        "  LD F, V1\n",
        "  LD V2, 10\n",
        "  LD V3, 5\n",
        "  DRW V2, V3, 5\n",
        "loop: JP loop\n",
    ));
    run_steps(&mut emu, 8);

    // Font sprite 3 is F0 10 F0 10 F0; every bit of it must land.
    for (row, bits) in [0xF0u8, 0x10, 0xF0, 0x10, 0xF0].into_iter().enumerate() {
        for col in 0..8 {
            let expected = bits >> (7 - col) & 1 != 0;
            assert_eq!(
                emu.pixel(10 + col, 5 + row),
                expected,
                "pixel ({}, {})",
                10 + col,
                5 + row
            );
        }
    }
    assert_eq!(emu.regs[FLAG_REG], 0);
    assert_eq!(emu.pc, 0x20C);
}

#[test]
fn waits_for_a_key_then_continues() {
    let mut emu = boot("LD V5, K\ndone: JP done\n");
    assert_eq!(emu.key, KEY_NONE);

    // No key: the machine sits on the wait instruction.
    run_steps(&mut emu, 4);
    assert_eq!(emu.pc, 0x200);

    emu.key = 7;
    run_steps(&mut emu, 1);
    assert_eq!(emu.regs[5], 7);
    assert_eq!(emu.pc, 0x202);

    // The next step executes the jump normally.
    run_steps(&mut emu, 1);
    assert_eq!(emu.pc, 0x202);
}

#[test]
fn bcd_round_trips_through_register_file_load() {
    let mut emu = boot(
        "LD V0, 197\n\
         LD I, 0x300\n\
         LD B, V0\n\
         LD V2, [I]\n",
    );
    run_steps(&mut emu, 4);
    assert_eq!(emu.regs[0], 1);
    assert_eq!(emu.regs[1], 9);
    assert_eq!(emu.regs[2], 7);
    // Loading back V0..=V2 must leave I where it was.
    assert_eq!(emu.index, 0x300);
}

#[test]
fn skip_instructions_route_control_flow() {
    let mut emu = boot(concat!(
        "LD V0, 5\n",
        "SE V0, 5\n",  // equal, skips
        "LD V1, 1\n",
        "SNE V0, 9\n", // not equal, skips
        "LD V2, 1\n",
        "SE V0, 9\n",  // not equal, does not skip
        "LD V3, 1\n",
        "done: JP done\n",
    ));
    run_steps(&mut emu, 6);
    assert_eq!(emu.regs[1], 0, "SE skipped over this load");
    assert_eq!(emu.regs[2], 0, "SNE skipped over this load");
    assert_eq!(emu.regs[3], 1, "failed SE must not skip");
    assert_eq!(emu.pc, 0x20E);
}

#[test]
fn subroutine_call_returns_past_the_call() {
    let mut emu = boot(
        "CALL init\n\
         done: JP done\n\
         init: LD V0, 9\n\
         RET\n",
    );
    run_steps(&mut emu, 3);
    assert_eq!(emu.regs[0], 9);
    assert_eq!(emu.pc, 0x202);
    assert_eq!(emu.sp, 0);
}

#[test]
fn octal_and_mixed_case_source_assembles() {
    let mut emu = boot("ld v1, 0o52\nAdD v1, 0B1\n");
    run_steps(&mut emu, 2);
    assert_eq!(emu.regs[1], 43);
}

#[test]
fn arithmetic_program_matches_seed_scenario() {
    let mut emu = boot("LD V0, 10\nLD V1, 3\nSUB V0, V1\n");
    run_steps(&mut emu, 3);
    assert_eq!(emu.regs[0], 7);
    assert_eq!(emu.regs[FLAG_REG], 1);
}
