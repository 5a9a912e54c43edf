//! End-to-end tests over the emitted assembly text.

use oops::{compile, Options};

#[track_caller]
fn compiled(source: &str) -> String {
    compile(source, &Options::default()).expect("expected the program to compile")
}

#[track_caller]
fn compiled_optimized(source: &str) -> String {
    let options = Options {
        optimize: true,
        ..Options::default()
    };
    compile(source, &options).expect("expected the program to compile")
}

#[track_caller]
fn compile_error(source: &str) -> String {
    compile(source, &Options::default())
        .expect_err("expected a compile error")
        .to_string()
}

#[test]
fn write_of_a_sum() {
    let source = "CLASS Main IS METHOD main IS BEGIN WRITE 1+2; END METHOD END CLASS";
    let asm = compiled(source);
    assert!(asm.contains("MRI R0, _writeChar"), "{asm}");
    assert!(asm.contains("ADD R5, R6"), "{asm}");

    // Optimized, the operands collapse into the character code 3.
    let optimized = compiled_optimized(source);
    assert!(optimized.contains("MRI R5, 3"), "{optimized}");
    assert!(!optimized.contains("ADD R5, R6"), "{optimized}");
}

#[test]
fn conditional_with_character_literals() {
    let source = "CLASS Main IS METHOD main IS BEGIN \
                  IF 1<2 THEN WRITE 'Y'; ELSE WRITE 'N'; END IF; \
                  END METHOD END CLASS";
    let asm = compiled(source);
    // Both branches are present, with the character codes of Y and N.
    assert!(asm.contains("MRI R5, 89"), "{asm}");
    assert!(asm.contains("MRI R5, 78"), "{asm}");
    assert!(asm.contains("JPC R5, Main_main_1 ; branch when the condition is false"), "{asm}");
}

#[test]
fn counter_object() {
    let source = "
        CLASS Counter IS
          PRIVATE n : Integer;

          METHOD init IS
          BEGIN
            n := 0;
          END METHOD

          METHOD inc IS
          BEGIN
            n := n + 1;
          END METHOD

          METHOD get : Integer IS
          BEGIN
            RETURN n;
          END METHOD
        END CLASS

        CLASS Main IS
          METHOD main IS
            c : Counter;
          BEGIN
            c := NEW Counter;
            c.init;
            c.inc;
            c.inc;
            c.inc;
            WRITE c.get;
          END METHOD
        END CLASS
    ";
    let asm = compiled(source);
    assert!(asm.contains("_Counter_VMT:"), "{asm}");
    assert!(asm.contains("DAT 1, Counter_inc"), "{asm}");
    assert!(asm.contains("; NEW Counter"), "{asm}");
    assert!(asm.contains("; dynamic dispatch of get"), "{asm}");
    // The non-void result is discarded inside inc's call statement, and
    // used (unboxed) by WRITE.
    assert!(asm.contains("; unbox"), "{asm}");
}

#[test]
fn overriding_dispatches_through_the_vmt() {
    let source = "
        CLASS Animal IS
          METHOD speak IS
          BEGIN
          END METHOD
        END CLASS

        CLASS Dog EXTENDS Animal IS
          METHOD speak IS
          BEGIN
            WRITE 'D';
          END METHOD
        END CLASS

        CLASS Cat EXTENDS Animal IS
          METHOD speak IS
          BEGIN
            WRITE 'C';
          END METHOD
        END CLASS

        CLASS Main IS
          METHOD main IS
            a : Animal;
          BEGIN
            a := NEW Dog;
            a.speak;
            a := NEW Cat;
            a.speak;
          END METHOD
        END CLASS
    ";
    let asm = compiled(source);
    // Each subclass replaces the inherited slot with its own entry point.
    assert!(asm.contains("_Dog_VMT:\nDAT 1, Dog_speak"), "{asm}");
    assert!(asm.contains("_Cat_VMT:\nDAT 1, Cat_speak"), "{asm}");
    // The call site loads the receiver's vtable through offset 0.
    assert!(asm.contains("; dynamic dispatch of speak"), "{asm}");
    assert!(
        asm.contains("MRM R5, (R5) ; the receiver\nMRM R5, (R5) ; its vtable"),
        "{asm}"
    );
    // No static jump to either override exists at the call site.
    assert!(!asm.contains("; static call of speak"), "{asm}");
}

#[test]
fn missing_return_on_one_path_is_rejected() {
    let source = "CLASS Main IS
  METHOD half(x : Integer) : Integer IS
  BEGIN
    IF x > 0 THEN
      RETURN x;
    END IF;
  END METHOD
  METHOD main IS BEGIN END METHOD
END CLASS";
    assert_eq!(
        compile_error(source),
        "Error at line 2, col 10: context error: \
         a return value is expected on every execution path"
    );
}

#[test]
fn short_circuit_keeps_the_division_from_folding_or_running() {
    let source = "CLASS Main IS METHOD main IS BEGIN \
                  IF FALSE AND THEN (1/0 = 0) THEN WRITE 'X'; END IF; \
                  END METHOD END CLASS";
    // Compiles as written.
    let asm = compiled(source);
    assert!(asm.contains("; AND THEN"), "{asm}");
    // Under -o the whole IF folds away, division included.
    let optimized = compiled_optimized(source);
    assert!(!optimized.contains("DIV"), "{optimized}");
    assert!(!optimized.contains("MRI R5, 88"), "{optimized}");
}

#[test]
fn elseif_chain_shares_one_end_if() {
    let source = "
        CLASS Main IS
          METHOD grade(score : Integer) IS
          BEGIN
            IF score > 89 THEN
              WRITE 'A';
            ELSEIF score > 79 THEN
              WRITE 'B';
            ELSEIF score > 69 THEN
              WRITE 'C';
            ELSE
              WRITE 'F';
            END IF;
          END METHOD

          METHOD main IS
          BEGIN
            grade(85);
          END METHOD
        END CLASS
    ";
    let asm = compiled(source);
    assert!(asm.contains("MRI R5, 66"), "{asm}"); // 'B'
    assert!(asm.contains("MRI R5, 70"), "{asm}"); // 'F'
}

#[test]
fn read_allocates_a_fresh_integer() {
    let source = "
        CLASS Main IS
          x : Integer;
          METHOD main IS
          BEGIN
            READ x;
            WRITE x;
          END METHOD
        END CLASS
    ";
    let asm = compiled(source);
    assert!(asm.contains("MRI R0, _readChar"), "{asm}");
    assert!(asm.contains("MMR (R4), R5 ; a fresh Integer for the value read"), "{asm}");
}

#[test]
fn null_dereference_is_not_checked_at_compile_time() {
    // Attribute access through a possibly-null receiver compiles; the VM
    // traps at run time.
    let source = "
        CLASS Box IS
          v : Integer;
        END CLASS
        CLASS Main IS
          METHOD main IS
            b : Box;
          BEGIN
            b := NULL;
            b.v := 0;
          END METHOD
        END CLASS
    ";
    compiled(source);
}

#[test]
fn the_demo_programs_compile() {
    for demo in [
        include_str!("../demos/hello.oops"),
        include_str!("../demos/list.oops"),
    ] {
        compiled(demo);
        compiled_optimized(demo);
    }
}
